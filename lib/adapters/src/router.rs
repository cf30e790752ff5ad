//! The bridge router: the single per-turn entry point for the transport
//! layer.
//!
//! The router validates the session, dispatches to the adapter registered
//! for the session's runtime mode, times the call, and records the outcome
//! in telemetry. Terminal events are also published on the session channel,
//! after every partial of the turn.

use crate::adapter::{AdapterStatus, ChatAdapter, EmitFn, InboundMessage, Turn};
use crate::error::BridgeError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use switchboard_core::{Result, SessionId};
use switchboard_session::SessionStore;
use switchboard_telemetry::{AdapterInvocation, BridgeTelemetry};
use tracing::{debug, instrument, warn};

/// Dispatches turns to the adapter servicing each session's runtime mode.
pub struct BridgeRouter {
    store: Arc<SessionStore>,
    telemetry: Arc<BridgeTelemetry>,
    adapters: HashMap<String, Arc<dyn ChatAdapter>>,
}

impl BridgeRouter {
    /// Creates a router with no registered adapters.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, telemetry: Arc<BridgeTelemetry>) -> Self {
        Self {
            store,
            telemetry,
            adapters: HashMap::new(),
        }
    }

    /// Registers an adapter under its runtime-mode id.
    pub fn register(&mut self, adapter: Arc<dyn ChatAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Availability of every registered adapter, for health and fallback
    /// decisions.
    #[must_use]
    pub fn statuses(&self) -> HashMap<String, AdapterStatus> {
        self.adapters
            .iter()
            .map(|(id, adapter)| (id.clone(), adapter.status()))
            .collect()
    }

    /// Runs one turn on the session's active adapter.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SessionNotFound`] for an unknown id or token
    /// mismatch, [`BridgeError::UnknownAdapter`] when no adapter services
    /// the session's runtime mode, and [`BridgeError::TurnFailed`] when the
    /// adapter's turn fails.
    #[instrument(skip(self, token, message, emit), fields(session_id = %session_id))]
    pub async fn process_message(
        &self,
        session_id: SessionId,
        token: &str,
        message: &InboundMessage,
        emit: Option<&EmitFn>,
    ) -> Result<Turn, BridgeError> {
        let session = self
            .store
            .validate(session_id, token)
            .ok_or(BridgeError::SessionNotFound)?;

        let adapter = self
            .adapters
            .get(&session.adapter)
            .ok_or_else(|| BridgeError::UnknownAdapter {
                adapter: session.adapter.clone(),
            })?
            .clone();

        let started = Instant::now();
        let outcome = adapter.process_message(&session, message, emit).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(turn) => {
                self.telemetry
                    .record_invocation(AdapterInvocation::success(adapter.id(), duration_ms));
                debug!(adapter = adapter.id(), duration_ms, "turn resolved");

                for event in &turn.events {
                    self.store.emit(session_id, event.clone());
                }
                Ok(turn)
            }
            Err(report) => {
                let reason = report.to_string();
                self.telemetry.record_invocation(AdapterInvocation::failure(
                    adapter.id(),
                    duration_ms,
                    reason.clone(),
                ));
                warn!(adapter = adapter.id(), duration_ms, %reason, "turn failed");

                Err(BridgeError::TurnFailed {
                    adapter: adapter.id().to_string(),
                    reason,
                }
                .into())
            }
        }
    }
}

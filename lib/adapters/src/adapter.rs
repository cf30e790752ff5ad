//! The per-turn contract every conversational backend implements.
//!
//! Adapters are stateless singletons: all per-conversation state lives in
//! session metadata, so one adapter instance safely serves many concurrent
//! sessions. A turn may push zero or more partial events through the
//! optional `emit` callback (and the session channel) while it runs; the
//! returned [`Turn`] is the authoritative terminal result.

use crate::error::AdapterError;
use async_trait::async_trait;
use switchboard_core::Result;
use switchboard_session::{BridgeEvent, BridgeSession, SessionStore};

/// Callback for pushing intra-turn partial events to the caller.
pub type EmitFn = dyn Fn(BridgeEvent) + Send + Sync;

/// Availability of an adapter, used for health and fallback decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStatus {
    /// Whether the adapter can currently service turns.
    pub available: bool,
    /// Human-readable detail, e.g. the missing credential.
    pub detail: String,
}

impl AdapterStatus {
    /// Creates an available status.
    #[must_use]
    pub fn available(detail: impl Into<String>) -> Self {
        Self {
            available: true,
            detail: detail.into(),
        }
    }

    /// Creates an unavailable status.
    #[must_use]
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            detail: detail.into(),
        }
    }
}

/// An inbound user message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The user's text.
    pub content: String,
    /// Optional spoken form supplied by a voice frontend.
    pub voice_hint: Option<String>,
}

impl InboundMessage {
    /// Creates a new inbound message.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            voice_hint: None,
        }
    }

    /// Attaches a voice hint.
    #[must_use]
    pub fn with_voice_hint(mut self, hint: impl Into<String>) -> Self {
        self.voice_hint = Some(hint.into());
        self
    }
}

/// The terminal result of a turn.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    /// Terminal events, delivered after all partials of the turn.
    pub events: Vec<BridgeEvent>,
}

impl Turn {
    /// Creates a turn resolving to a single terminal event.
    #[must_use]
    pub fn terminal(event: BridgeEvent) -> Self {
        Self {
            events: vec![event],
        }
    }
}

/// A conversational backend servicing one runtime mode.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// The runtime-mode id this adapter services.
    fn id(&self) -> &'static str;

    /// Current availability. Repeated calls without an intervening turn
    /// return identical results.
    fn status(&self) -> AdapterStatus;

    /// Runs one turn of the conversation.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider fails or emits output the
    /// protocol cannot recover from. Tool failures never fail the turn.
    async fn process_message(
        &self,
        session: &BridgeSession,
        message: &InboundMessage,
        emit: Option<&EmitFn>,
    ) -> Result<Turn, AdapterError>;
}

/// Delivers a partial event both to the caller's callback and to the
/// session's event channel.
pub(crate) fn push_partial(
    store: &SessionStore,
    session: &BridgeSession,
    emit: Option<&EmitFn>,
    event: BridgeEvent,
) {
    if let Some(emit) = emit {
        emit(event.clone());
    }
    store.emit(session.id, event);
}

//! Bridge session identity and the in-memory session store.
//!
//! A session is the addressable unit of conversational state: an id/token
//! pair, the active runtime mode, one conversation history per adapter kind,
//! and an event channel. The store is process-local; sessions are lost on
//! restart by design.

use crate::event::BridgeEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use switchboard_core::{ConversationId, SessionId, UserId};
use tokio::sync::broadcast;
use tracing::debug;
use ulid::Ulid;

/// Capacity of each session's event channel. Subscribers that fall further
/// behind than this observe a lag and lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Metadata key under which an adapter's conversation history is stored.
fn history_key(adapter: &str) -> String {
    format!("history:{adapter}")
}

/// Opaque capability secret required on every external access to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{}{}", Ulid::new(), Ulid::new()).to_lowercase())
    }

    /// Compares this token against a presented candidate in constant time.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let token = self.0.as_bytes();
        let candidate = candidate.as_bytes();
        if token.len() != candidate.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in token.iter().zip(candidate) {
            diff |= a ^ b;
        }
        diff == 0
    }

    /// Returns the secret for handing to the session's owner.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// A bridge session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Capability secret; must match exactly on every external operation.
    pub token: SessionToken,
    /// The user who owns this session.
    pub user_id: UserId,
    /// Active runtime-mode id selecting the servicing adapter.
    pub adapter: String,
    /// The logical conversation this session services.
    pub conversation_id: ConversationId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last touched.
    pub last_active: DateTime<Utc>,
    /// Open metadata map, including one `history:<adapter>` array per
    /// adapter kind.
    pub metadata: HashMap<String, JsonValue>,
}

impl BridgeSession {
    fn new(user_id: UserId, adapter: String, metadata: Option<HashMap<String, JsonValue>>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            token: SessionToken::generate(),
            user_id,
            adapter,
            conversation_id: ConversationId::new(),
            created_at: now,
            last_active: now,
            metadata: metadata.unwrap_or_default(),
        }
    }

    /// Returns the stored conversation history for an adapter, empty when the
    /// adapter has not serviced this session yet.
    #[must_use]
    pub fn history(&self, adapter: &str) -> Vec<JsonValue> {
        match self.metadata.get(&history_key(adapter)) {
            Some(JsonValue::Array(records)) => records.clone(),
            _ => Vec::new(),
        }
    }

    /// Replaces the stored conversation history for an adapter. Histories of
    /// other adapters are untouched.
    pub fn set_history(&mut self, adapter: &str, records: Vec<JsonValue>) {
        self.metadata
            .insert(history_key(adapter), JsonValue::Array(records));
    }
}

struct SessionEntry {
    session: BridgeSession,
    channel: broadcast::Sender<BridgeEvent>,
}

/// Process-local store of active bridge sessions.
///
/// All operations take `&self`; interior state is guarded by a mutex that is
/// never held across an await point.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        // A panic while holding the lock leaves the map consistent enough to
        // keep serving lookups; poisoning is therefore tolerated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a fresh session for a user on the given runtime mode.
    pub fn create_session(
        &self,
        user_id: UserId,
        adapter: impl Into<String>,
        metadata: Option<HashMap<String, JsonValue>>,
    ) -> BridgeSession {
        let session = BridgeSession::new(user_id, adapter.into(), metadata);
        let (channel, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        debug!(session_id = %session.id, adapter = %session.adapter, "session created");

        let snapshot = session.clone();
        self.lock()
            .insert(session.id, SessionEntry { session, channel });
        snapshot
    }

    /// Returns the session iff the id is known and the token matches exactly;
    /// refreshes `last_active` on success. Never fails loudly: any other
    /// input yields `None`.
    pub fn validate(&self, session_id: SessionId, token: &str) -> Option<BridgeSession> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&session_id)?;
        if !entry.session.token.matches(token) {
            return None;
        }
        entry.session.last_active = Utc::now();
        Some(entry.session.clone())
    }

    /// Returns a session snapshot without touching it.
    pub fn get(&self, session_id: SessionId) -> Option<BridgeSession> {
        self.lock().get(&session_id).map(|e| e.session.clone())
    }

    /// Switches the session's active adapter. Other adapters' stored
    /// histories are not touched. Returns false for an unknown session.
    pub fn update_adapter(&self, session_id: SessionId, adapter: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(&session_id) {
            Some(entry) => {
                entry.session.adapter = adapter.to_string();
                entry.session.last_active = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Delivers an event to the session's current subscribers. A no-op for an
    /// unknown session: late events after teardown must never crash the
    /// caller. Delivery refreshes `last_active`.
    pub fn emit(&self, session_id: SessionId, event: BridgeEvent) {
        let mut sessions = self.lock();
        if let Some(entry) = sessions.get_mut(&session_id) {
            entry.session.last_active = Utc::now();
            // Send only fails when no subscriber is attached.
            let _ = entry.channel.send(event);
        }
    }

    /// Subscribes to the session's event channel.
    pub fn subscribe(&self, session_id: SessionId) -> Option<broadcast::Receiver<BridgeEvent>> {
        self.lock().get(&session_id).map(|e| e.channel.subscribe())
    }

    /// Removes the session and drops its channel, ending all subscriptions.
    /// Idempotent.
    pub fn delete(&self, session_id: SessionId) {
        if self.lock().remove(&session_id).is_some() {
            debug!(session_id = %session_id, "session deleted");
        }
    }

    /// Snapshot of all active sessions, for operational visibility.
    pub fn list_active_sessions(&self) -> Vec<BridgeSession> {
        self.lock().values().map(|e| e.session.clone()).collect()
    }

    /// Returns the stored history for one adapter of a session.
    pub fn history(&self, session_id: SessionId, adapter: &str) -> Vec<JsonValue> {
        self.lock()
            .get(&session_id)
            .map(|e| e.session.history(adapter))
            .unwrap_or_default()
    }

    /// Stores an adapter's history for a session. A no-op for an unknown
    /// session.
    ///
    /// Concurrent turns on the same session each load a snapshot and store it
    /// back here when they finish; the later store wins. Turns on different
    /// sessions never interfere.
    pub fn store_history(&self, session_id: SessionId, adapter: &str, records: Vec<JsonValue>) {
        let mut sessions = self.lock();
        if let Some(entry) = sessions.get_mut(&session_id) {
            entry.session.set_history(adapter, records);
        }
    }
}

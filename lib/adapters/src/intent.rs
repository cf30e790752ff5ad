//! Keyword/intent routing collaborator interface for the local adapter.

use crate::error::IntentError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use switchboard_core::UserId;

/// A single-turn routing decision. Never persisted past the turn that
/// produced it.
#[derive(Debug, Clone)]
pub struct RoutedIntent {
    /// Dispatcher tool id.
    pub tool: String,
    /// Action on the tool.
    pub action: String,
    /// Parameters extracted from the message.
    pub parameters: JsonValue,
    /// Matcher confidence (0.0 - 1.0).
    pub confidence: f64,
}

/// External keyword/intent matcher.
#[async_trait]
pub trait IntentParser: Send + Sync {
    /// Parses a message into a routed intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be routed to any tool.
    async fn parse_and_route(&self, text: &str, user_id: UserId)
    -> Result<RoutedIntent, IntentError>;
}

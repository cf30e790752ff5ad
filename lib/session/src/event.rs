//! Canonical event types for the bridge.
//!
//! Every adapter funnels its output into [`BridgeEvent`] so downstream
//! consumers never special-case a provider. Partial output produced while a
//! turn is still running travels over the session channel; the events
//! returned from a turn are its authoritative terminal result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use switchboard_core::EventId;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User/human message.
    User,
    /// Assistant/AI message.
    Assistant,
    /// System message.
    System,
}

/// Payload of a bridge event, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A complete chat message.
    Message {
        /// Who produced the message.
        role: MessageRole,
        /// Display text.
        content: String,
        /// Optional short spoken-summary variant of the content.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_hint: Option<String>,
    },
    /// Progress for an in-flight turn: a structured status `data` object, or
    /// a streamed text `delta` fragment.
    Status {
        /// Tool the status refers to.
        tool: String,
        /// Action the status refers to.
        action: String,
        /// Structured status data.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonValue>,
        /// Incremental text fragment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    /// Result of a tool invocation, successful or synthesized from a failure.
    ToolResult {
        /// Tool that produced the result.
        tool: String,
        /// Action that produced the result.
        action: String,
        /// Opaque result data.
        data: JsonValue,
    },
}

/// An event delivered on a session's channel or returned from a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Tool/action labels used for streamed assistant text fragments, which have
/// no tool of their own.
const STREAM_TOOL: &str = "assistant";
const STREAM_ACTION: &str = "stream";

impl BridgeEvent {
    /// Creates an event from a payload.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Creates a message event.
    #[must_use]
    pub fn message(role: MessageRole, content: impl Into<String>) -> Self {
        Self::new(EventPayload::Message {
            role,
            content: content.into(),
            voice_hint: None,
        })
    }

    /// Creates an assistant message event with an optional voice hint.
    #[must_use]
    pub fn assistant(content: impl Into<String>, voice_hint: Option<String>) -> Self {
        Self::new(EventPayload::Message {
            role: MessageRole::Assistant,
            content: content.into(),
            voice_hint,
        })
    }

    /// Creates a status event carrying structured data.
    #[must_use]
    pub fn status(
        tool: impl Into<String>,
        action: impl Into<String>,
        data: Option<JsonValue>,
    ) -> Self {
        Self::new(EventPayload::Status {
            tool: tool.into(),
            action: action.into(),
            data,
            delta: None,
        })
    }

    /// Creates a status event carrying a streamed assistant text fragment.
    #[must_use]
    pub fn stream_delta(fragment: impl Into<String>) -> Self {
        Self::new(EventPayload::Status {
            tool: STREAM_TOOL.to_string(),
            action: STREAM_ACTION.to_string(),
            data: None,
            delta: Some(fragment.into()),
        })
    }

    /// Creates a tool result event.
    #[must_use]
    pub fn tool_result(
        tool: impl Into<String>,
        action: impl Into<String>,
        data: JsonValue,
    ) -> Self {
        Self::new(EventPayload::ToolResult {
            tool: tool.into(),
            action: action.into(),
            data,
        })
    }

    /// Returns true if this is a terminal-style message event.
    #[must_use]
    pub fn is_message(&self) -> bool {
        matches!(self.payload, EventPayload::Message { .. })
    }
}

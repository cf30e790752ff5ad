//! Error types for the adapters crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ProviderError`: Low-level provider wire operations
//! - `ToolError`: Tool dispatcher failures
//! - `IntentError`: Keyword/intent routing failures
//! - `AdapterError`: Failures terminating a turn
//! - `BridgeError`: Failures surfaced by the router to the transport layer

use std::fmt;

/// Errors from provider wire operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider is unavailable.
    ProviderUnavailable { provider: String, reason: String },
    /// Request failed.
    RequestFailed { reason: String },
    /// Response parsing failed.
    ResponseParseFailed { reason: String },
    /// Timeout waiting for response.
    Timeout,
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "provider '{provider}' unavailable: {reason}")
            }
            Self::RequestFailed { reason } => {
                write!(f, "provider request failed: {reason}")
            }
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse provider response: {reason}")
            }
            Self::Timeout => write!(f, "provider request timed out"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid provider configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors from tool dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Tool not known to the dispatcher.
    UnknownTool { tool: String },
    /// Tool execution failed.
    ExecutionFailed { tool: String, reason: String },
    /// Invalid tool parameters.
    InvalidParameters { tool: String, reason: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { tool } => write!(f, "unknown tool: {tool}"),
            Self::ExecutionFailed { tool, reason } => {
                write!(f, "tool '{tool}' execution failed: {reason}")
            }
            Self::InvalidParameters { tool, reason } => {
                write!(f, "invalid parameters for tool '{tool}': {reason}")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors from intent routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    /// The message could not be routed to any tool.
    Unroutable { reason: String },
}

impl fmt::Display for IntentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unroutable { reason } => write!(f, "message could not be routed: {reason}"),
        }
    }
}

impl std::error::Error for IntentError {}

/// Errors terminating an adapter turn.
///
/// Configuration problems are deliberately absent: missing credentials are
/// surfaced through `ChatAdapter::status`, never thrown mid-turn. Tool
/// failures never terminate a turn either; they are fed back into the
/// conversation as error-shaped tool results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The provider produced output the protocol cannot recover from.
    Protocol { reason: String },
    /// The provider wire call failed.
    Provider(ProviderError),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol { reason } => write!(f, "protocol failure: {reason}"),
            Self::Provider(source) => write!(f, "provider failure: {source}"),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<ProviderError> for AdapterError {
    fn from(source: ProviderError) -> Self {
        Self::Provider(source)
    }
}

/// Errors surfaced by the bridge router to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Unknown session id or token mismatch.
    SessionNotFound,
    /// No adapter is registered for the session's runtime mode.
    UnknownAdapter { adapter: String },
    /// The adapter's turn failed.
    TurnFailed { adapter: String, reason: String },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound => write!(f, "session not found"),
            Self::UnknownAdapter { adapter } => {
                write!(f, "no adapter registered for runtime mode '{adapter}'")
            }
            Self::TurnFailed { adapter, reason } => {
                write!(f, "turn failed on adapter '{adapter}': {reason}")
            }
        }
    }
}

impl std::error::Error for BridgeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display() {
        let err = ProviderError::ProviderUnavailable {
            provider: "ollama".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("ollama"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn adapter_error_wraps_provider_error() {
        let err: AdapterError = ProviderError::Timeout.into();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::UnknownAdapter {
            adapter: "telegraph".to_string(),
        };
        assert!(err.to_string().contains("telegraph"));
    }
}

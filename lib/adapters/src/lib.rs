//! Conversational backend adapters and the bridge router.
//!
//! This crate normalizes four incompatible backends behind one per-turn
//! contract:
//!
//! - [`KeywordAdapter`]: deterministic keyword routing, no model
//! - [`AnthropicAdapter`]: native tool-use blocks over SSE streaming
//! - [`OpenAiAdapter`]: function calling with fragmented call arguments
//! - [`OllamaAdapter`]: a self-hosted model with no native tool channel,
//!   driven by a hand-rolled plan/execute/summarize protocol
//!
//! [`BridgeRouter`] is the single entry point the transport layer invokes;
//! it dispatches to the adapter registered for a session's runtime mode and
//! records invocation telemetry.

pub mod adapter;
pub mod anthropic;
pub mod config;
pub mod dispatch;
pub mod error;
mod history;
pub mod intent;
pub mod local;
pub mod normalize;
pub mod ollama;
pub mod openai;
pub mod router;
mod sse;

pub use adapter::{AdapterStatus, ChatAdapter, EmitFn, InboundMessage, Turn};
pub use anthropic::AnthropicAdapter;
pub use config::BridgeConfig;
pub use dispatch::{ToolCatalog, ToolDefinition, ToolDispatcher};
pub use error::{AdapterError, BridgeError, IntentError, ProviderError, ToolError};
pub use intent::{IntentParser, RoutedIntent};
pub use local::KeywordAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use router::BridgeRouter;

//! Bridge session management for the switchboard platform.
//!
//! This crate provides:
//!
//! - The canonical [`BridgeEvent`] shape every adapter emits, regardless of
//!   which provider protocol produced it
//! - [`BridgeSession`], the addressable unit of conversational state
//! - [`SessionStore`], the process-local store owning session identity,
//!   per-adapter conversation history, and the per-session event channel
//!
//! Sessions are process-local and lost on restart; durable persistence is a
//! collaborator's concern.

pub mod event;
pub mod session;

pub use event::{BridgeEvent, EventPayload, MessageRole};
pub use session::{BridgeSession, SessionStore, SessionToken};

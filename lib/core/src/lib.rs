//! Core domain types and utilities for the switchboard bridge.
//!
//! This crate provides the foundational identifier types and error handling
//! shared by the session store, the telemetry sink, and the adapters.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConversationId, EventId, SessionId, UserId};

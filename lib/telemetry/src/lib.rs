//! Adapter invocation telemetry for the switchboard platform.
//!
//! A passive observer of the bridge: per-adapter success/failure totals plus
//! a bounded ring of recent invocations. Recording never fails into the
//! turn-processing path.

pub mod metrics;

pub use metrics::{AdapterInvocation, AdapterStats, BridgeTelemetry, TelemetrySnapshot};

//! Invocation metrics: running totals and a recent-activity ring buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Maximum number of invocations kept in the recent-activity ring.
const RECENT_CAPACITY: usize = 50;

/// Record of a single top-level adapter invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInvocation {
    /// Runtime-mode id of the invoked adapter.
    pub adapter_id: String,
    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: u64,
    /// Whether the call resolved successfully.
    pub success: bool,
    /// When the call finished.
    pub timestamp: DateTime<Utc>,
    /// Error message for failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdapterInvocation {
    /// Creates a successful invocation record.
    #[must_use]
    pub fn success(adapter_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            duration_ms,
            success: true,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates a failed invocation record.
    #[must_use]
    pub fn failure(
        adapter_id: impl Into<String>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            duration_ms,
            success: false,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Per-adapter running totals with the read-time average.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterStats {
    /// Number of successful invocations.
    pub success_count: u64,
    /// Number of failed invocations.
    pub failure_count: u64,
    /// Sum of all invocation durations in milliseconds.
    pub total_duration_ms: u64,
    /// Count-weighted average duration, computed when the snapshot is taken.
    pub average_ms: u64,
}

impl AdapterStats {
    fn with_average(&self) -> Self {
        let count = self.success_count + self.failure_count;
        let average_ms = if count == 0 {
            0
        } else {
            ((self.total_duration_ms as f64) / (count as f64)).round() as u64
        };
        Self {
            average_ms,
            ..self.clone()
        }
    }
}

/// Point-in-time view of the telemetry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Totals keyed by adapter id.
    pub totals: HashMap<String, AdapterStats>,
    /// Most recent invocations, oldest first.
    pub recent: Vec<AdapterInvocation>,
    /// When the last invocation was recorded.
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TelemetryState {
    totals: HashMap<String, AdapterStats>,
    recent: VecDeque<AdapterInvocation>,
    last_updated: Option<DateTime<Utc>>,
}

/// Telemetry sink for adapter invocations.
///
/// Averages are computed on read rather than kept as a running value, so a
/// long-lived process never accumulates drift.
#[derive(Default)]
pub struct BridgeTelemetry {
    inner: Mutex<TelemetryState>,
}

impl BridgeTelemetry {
    /// Creates an empty telemetry sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TelemetryState> {
        // Telemetry must never take the turn path down with it; a poisoned
        // lock keeps serving whatever state it holds.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records an invocation: appends to the ring buffer and folds the
    /// running totals. Never fails.
    pub fn record_invocation(&self, invocation: AdapterInvocation) {
        let mut state = self.lock();

        let totals = state.totals.entry(invocation.adapter_id.clone()).or_default();
        if invocation.success {
            totals.success_count += 1;
        } else {
            totals.failure_count += 1;
        }
        totals.total_duration_ms += invocation.duration_ms;

        state.last_updated = Some(invocation.timestamp);
        state.recent.push_back(invocation);
        while state.recent.len() > RECENT_CAPACITY {
            state.recent.pop_front();
        }
    }

    /// Returns the current totals (with count-weighted averages), the recent
    /// ring, and the last-update timestamp.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.lock();
        TelemetrySnapshot {
            totals: state
                .totals
                .iter()
                .map(|(id, stats)| (id.clone(), stats.with_average()))
                .collect(),
            recent: state.recent.iter().cloned().collect(),
            last_updated: state.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_fold_success_and_failure() {
        let telemetry = BridgeTelemetry::new();
        telemetry.record_invocation(AdapterInvocation::success("anthropic", 120));
        telemetry.record_invocation(AdapterInvocation::failure("anthropic", 80, "boom"));

        let snapshot = telemetry.snapshot();
        let stats = snapshot.totals.get("anthropic").expect("totals");
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.total_duration_ms, 200);
        assert_eq!(stats.average_ms, 100);
        assert!(snapshot.last_updated.is_some());
    }

    #[test]
    fn average_rounds_to_nearest() {
        let telemetry = BridgeTelemetry::new();
        telemetry.record_invocation(AdapterInvocation::success("local", 1));
        telemetry.record_invocation(AdapterInvocation::success("local", 2));

        let snapshot = telemetry.snapshot();
        // 3 / 2 = 1.5 rounds to 2.
        assert_eq!(snapshot.totals["local"].average_ms, 2);
    }

    #[test]
    fn empty_snapshot_has_zero_average() {
        let telemetry = BridgeTelemetry::new();
        let snapshot = telemetry.snapshot();
        assert!(snapshot.totals.is_empty());
        assert!(snapshot.recent.is_empty());
        assert!(snapshot.last_updated.is_none());

        let stats = AdapterStats::default().with_average();
        assert_eq!(stats.average_ms, 0);
    }

    #[test]
    fn recent_ring_is_bounded() {
        let telemetry = BridgeTelemetry::new();
        for i in 0..70 {
            telemetry.record_invocation(AdapterInvocation::success("openai", i));
        }

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.recent.len(), 50);
        // Oldest entries are evicted first.
        assert_eq!(snapshot.recent.first().expect("first").duration_ms, 20);
        assert_eq!(snapshot.recent.last().expect("last").duration_ms, 69);

        // Totals still cover every invocation, not just the ring.
        assert_eq!(snapshot.totals["openai"].success_count, 70);
    }

    #[test]
    fn invocation_serde_roundtrip() {
        let invocation = AdapterInvocation::failure("ollama", 42, "plan parse failed");
        let json = serde_json::to_string(&invocation).expect("serialize");
        let parsed: AdapterInvocation = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(parsed.adapter_id, "ollama");
        assert!(!parsed.success);
        assert_eq!(parsed.error.as_deref(), Some("plan parse failed"));
    }
}

//! Prometheus metrics for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total JSON-RPC requests handled
    pub requests_total: AtomicU64,
    /// Requests answered with a JSON-RPC error
    pub requests_failed: AtomicU64,
    /// Tool calls
    pub tool_calls: AtomicU64,
    /// Tool calls rejected by input validation
    pub invalid_inputs: AtomicU64,
    /// HTTP requests rejected by the auth gate
    pub auth_rejections: AtomicU64,
    /// Open SSE / streamable-HTTP sessions
    pub active_sessions: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalid_inputs(&self) {
        self.invalid_inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_rejections(&self) {
        self.auth_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn session_closed(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            invalid_inputs: self.invalid_inputs.load(Ordering::Relaxed),
            auth_rejections: self.auth_rejections.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP yardstick_requests_total Total number of JSON-RPC requests
# TYPE yardstick_requests_total counter
yardstick_requests_total {}

# HELP yardstick_requests_failed JSON-RPC requests answered with an error
# TYPE yardstick_requests_failed counter
yardstick_requests_failed {}

# HELP yardstick_tool_calls Tool calls count
# TYPE yardstick_tool_calls counter
yardstick_tool_calls {}

# HELP yardstick_invalid_inputs Tool calls rejected by input validation
# TYPE yardstick_invalid_inputs counter
yardstick_invalid_inputs {}

# HELP yardstick_auth_rejections HTTP requests rejected by the auth gate
# TYPE yardstick_auth_rejections counter
yardstick_auth_rejections {}

# HELP yardstick_active_sessions Open HTTP transport sessions
# TYPE yardstick_active_sessions gauge
yardstick_active_sessions {}
"#,
            s.requests_total,
            s.requests_failed,
            s.tool_calls,
            s.invalid_inputs,
            s.auth_rejections,
            s.active_sessions
        )
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub tool_calls: u64,
    pub invalid_inputs: u64,
    pub auth_rejections: u64,
    pub active_sessions: u64,
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

//! Telemetry Hooks (§2 item 9).
//!
//! Interface only; the backend is pluggable. This crate's default
//! implementation re-exposes the OAuth 2.0 cache's counters and emits
//! one structured `tracing` event per completed request, mirroring the
//! `target`/`method`/`status`/`duration_ms` field convention used
//! across the teacher's proxy service.

use std::time::Duration;

use crate::oauth2::CacheStatsSnapshot;

/// Emit one structured event for a completed forwarded request.
pub fn record_request(target: &str, method: &str, status: u16, duration: Duration) {
    tracing::info!(
        target = target,
        method = method,
        status = status,
        duration_ms = duration.as_millis() as u64,
        "request forwarded"
    );
}

/// Emit one structured event for a health-check pass.
pub fn record_health_check(name: &str, healthy: bool, duration: Duration) {
    tracing::debug!(
        target = name,
        healthy = healthy,
        duration_ms = duration.as_millis() as u64,
        "health check completed"
    );
}

/// Snapshot of everything this crate tracks, for a future `/metrics`-style
/// surface (out of core scope, but the counters already exist).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct TelemetrySnapshot {
    pub oauth2: CacheStatsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_does_not_panic_without_subscriber() {
        record_request("api", "GET", 200, Duration::from_millis(42));
    }

    #[test]
    fn record_health_check_does_not_panic_without_subscriber() {
        record_health_check("api", true, Duration::from_millis(5));
    }
}

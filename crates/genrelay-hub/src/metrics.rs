//! Runtime metrics — track generate requests, outcomes, latency.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide counters, safe for concurrent increment.
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub requests_cancelled: AtomicU64,
    /// Provider attempts across all requests.
    pub provider_attempts: AtomicU64,
    /// Successes served by a provider other than the first in the chain.
    pub fallback_successes: AtomicU64,
    pub latency_ms_total: AtomicU64,
    start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_success(&self, attempts: usize, elapsed: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_success.fetch_add(1, Ordering::Relaxed);
        self.provider_attempts
            .fetch_add(attempts as u64, Ordering::Relaxed);
        if attempts > 1 {
            self.fallback_successes.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(elapsed);
    }

    pub fn record_failure(&self, attempts: usize, elapsed: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_error.fetch_add(1, Ordering::Relaxed);
        self.provider_attempts
            .fetch_add(attempts as u64, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    pub fn record_cancelled(&self, attempts: usize, elapsed: Duration) {
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
        self.record_failure(attempts, elapsed);
    }

    fn record_latency(&self, elapsed: Duration) {
        self.latency_ms_total
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Export as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let uptime = self.uptime_secs();
        let hours = uptime / 3600;
        let minutes = (uptime % 3600) / 60;
        let seconds = uptime % 60;

        let total = self.requests_total.load(Ordering::Relaxed);
        let latency = self.latency_ms_total.load(Ordering::Relaxed);
        let avg_latency = if total == 0 { 0 } else { latency / total };

        serde_json::json!({
            "uptime": format!("{}h {}m {}s", hours, minutes, seconds),
            "uptime_secs": uptime,
            "requests": {
                "total": total,
                "success": self.requests_success.load(Ordering::Relaxed),
                "errors": self.requests_error.load(Ordering::Relaxed),
                "cancelled": self.requests_cancelled.load(Ordering::Relaxed),
            },
            "provider_attempts": self.provider_attempts.load(Ordering::Relaxed),
            "fallback_successes": self.fallback_successes.load(Ordering::Relaxed),
            "avg_latency_ms": avg_latency,
        })
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

pub fn new_metrics() -> SharedMetrics {
    Arc::new(Metrics::new())
}

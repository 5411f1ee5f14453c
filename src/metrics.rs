use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Metrics collection for the runtime engine and message plane.
#[derive(Debug)]
pub struct ServerMetrics {
    // Connection metrics
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub disconnections: AtomicU64,

    // Router metrics
    pub packets_sent: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub sync_packets_emitted: AtomicU64,
    pub sync_calls_empty: AtomicU64,

    // Engine metrics
    pub engine_ticks: AtomicU64,
    pub static_tasks_launched: AtomicU64,
    pub static_tasks_skipped: AtomicU64,
    pub dynamic_tasks_launched: AtomicU64,
    pub dynamic_tasks_dropped: AtomicU64,
    pub cron_fires: AtomicU64,
    pub task_errors: AtomicU64,

    // Bridge metrics
    pub bridge_pushes: AtomicU64,
    pub bridge_deliveries: AtomicU64,
    pub bridge_loopbacks_discarded: AtomicU64,
    pub bridge_held_messages: AtomicU64,

    // Retry metrics
    pub retry_attempts: AtomicU64,
    pub retry_successes: AtomicU64,

    // Cleanup metrics
    pub expired_connections_cleaned: AtomicU64,

    /// Engine-iteration durations in microseconds.
    tick_durations: Mutex<Histogram<u64>>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            sync_packets_emitted: AtomicU64::new(0),
            sync_calls_empty: AtomicU64::new(0),
            engine_ticks: AtomicU64::new(0),
            static_tasks_launched: AtomicU64::new(0),
            static_tasks_skipped: AtomicU64::new(0),
            dynamic_tasks_launched: AtomicU64::new(0),
            dynamic_tasks_dropped: AtomicU64::new(0),
            cron_fires: AtomicU64::new(0),
            task_errors: AtomicU64::new(0),
            bridge_pushes: AtomicU64::new(0),
            bridge_deliveries: AtomicU64::new(0),
            bridge_loopbacks_discarded: AtomicU64::new(0),
            bridge_held_messages: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
            retry_successes: AtomicU64::new(0),
            expired_connections_cleaned: AtomicU64::new(0),
            tick_durations: Mutex::new(
                Histogram::new_with_bounds(1, 60_000_000, 3).unwrap_or_else(|_| {
                    Histogram::new(2).expect("auto-resizing histogram")
                }),
            ),
        }
    }

    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
        let mut current = self.active_connections.load(Ordering::Relaxed);
        while current > 0 {
            match self.active_connections.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn increment_retry_attempts(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retry_successes(&self) {
        self.retry_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_duration(&self, duration: Duration) {
        let micros = duration.as_micros().min(u128::from(u64::MAX)) as u64;
        if let Ok(mut histogram) = self.tick_durations.lock() {
            let _ = histogram.record(micros.max(1));
        }
    }

    /// Point-in-time snapshot for the metrics endpoint and logs.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (tick_p50_us, tick_p99_us, tick_max_us) = match self.tick_durations.lock() {
            Ok(histogram) if histogram.len() > 0 => (
                histogram.value_at_quantile(0.5),
                histogram.value_at_quantile(0.99),
                histogram.max(),
            ),
            _ => (0, 0, 0),
        };

        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            sync_packets_emitted: self.sync_packets_emitted.load(Ordering::Relaxed),
            engine_ticks: self.engine_ticks.load(Ordering::Relaxed),
            static_tasks_launched: self.static_tasks_launched.load(Ordering::Relaxed),
            dynamic_tasks_launched: self.dynamic_tasks_launched.load(Ordering::Relaxed),
            dynamic_tasks_dropped: self.dynamic_tasks_dropped.load(Ordering::Relaxed),
            cron_fires: self.cron_fires.load(Ordering::Relaxed),
            task_errors: self.task_errors.load(Ordering::Relaxed),
            bridge_pushes: self.bridge_pushes.load(Ordering::Relaxed),
            bridge_deliveries: self.bridge_deliveries.load(Ordering::Relaxed),
            bridge_loopbacks_discarded: self.bridge_loopbacks_discarded.load(Ordering::Relaxed),
            expired_connections_cleaned: self
                .expired_connections_cleaned
                .load(Ordering::Relaxed),
            tick_p50_us,
            tick_p99_us,
            tick_max_us,
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of the counters, served by the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub disconnections: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub sync_packets_emitted: u64,
    pub engine_ticks: u64,
    pub static_tasks_launched: u64,
    pub dynamic_tasks_launched: u64,
    pub dynamic_tasks_dropped: u64,
    pub cron_fires: u64,
    pub task_errors: u64,
    pub bridge_pushes: u64,
    pub bridge_deliveries: u64,
    pub bridge_loopbacks_discarded: u64,
    pub expired_connections_cleaned: u64,
    pub tick_p50_us: u64,
    pub tick_p99_us: u64,
    pub tick_max_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_counters_track_up_and_down() {
        let metrics = ServerMetrics::new();
        metrics.increment_connections();
        metrics.increment_connections();
        metrics.decrement_connections();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.disconnections, 1);
    }

    #[test]
    fn active_connections_never_underflow() {
        let metrics = ServerMetrics::new();
        metrics.decrement_connections();
        assert_eq!(metrics.snapshot().active_connections, 0);
    }

    #[test]
    fn tick_histogram_reports_percentiles() {
        let metrics = ServerMetrics::new();
        for millis in [1u64, 2, 3, 4, 100] {
            metrics.record_tick_duration(Duration::from_millis(millis));
        }

        let snapshot = metrics.snapshot();
        assert!(snapshot.tick_p50_us >= 1_000);
        assert!(snapshot.tick_max_us >= 99_000);
    }
}

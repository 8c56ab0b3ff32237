//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `projection_events_applied_total` - Events applied with state changes
//! - `projection_events_skipped_total` - Events consumed without state changes, by reason
//! - `projection_apply_duration_seconds` - Histogram of per-event apply latencies
//! - `projection_checkpoint_block` - Block height of the last committed checkpoint

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Events applied with state changes
    pub events_applied: IntCounter,

    /// Events consumed without state changes, labeled by skip reason
    pub events_skipped: IntCounterVec,

    /// Per-event apply latency histogram
    pub apply_duration: Histogram,

    /// Block height of the last committed checkpoint
    pub checkpoint_block: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let events_applied = IntCounter::with_opts(Opts::new(
            "projection_events_applied_total",
            "Events applied with state changes",
        ))?;
        registry.register(Box::new(events_applied.clone()))?;

        let events_skipped = IntCounterVec::new(
            Opts::new(
                "projection_events_skipped_total",
                "Events consumed without state changes, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(events_skipped.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new(
                "projection_apply_duration_seconds",
                "Histogram of per-event apply latencies",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        let checkpoint_block = IntGauge::with_opts(Opts::new(
            "projection_checkpoint_block",
            "Block height of the last committed checkpoint",
        ))?;
        registry.register(Box::new(checkpoint_block.clone()))?;

        Ok(Self {
            events_applied,
            events_skipped,
            apply_duration,
            checkpoint_block,
            registry,
        })
    }

    /// Record an applied event
    pub fn record_applied(&self) {
        self.events_applied.inc();
    }

    /// Record a skipped event
    pub fn record_skipped(&self, reason: &str) {
        self.events_skipped.with_label_values(&[reason]).inc();
    }

    /// Record per-event apply latency
    pub fn record_apply_duration(&self, duration_seconds: f64) {
        self.apply_duration.observe(duration_seconds);
    }

    /// Update the checkpoint block gauge
    pub fn update_checkpoint_block(&self, block: i64) {
        self.checkpoint_block.set(block);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.events_applied.get(), 0);
    }

    #[test]
    fn test_record_applied() {
        let metrics = Metrics::new().unwrap();
        metrics.record_applied();
        metrics.record_applied();
        assert_eq!(metrics.events_applied.get(), 2);
    }

    #[test]
    fn test_record_skipped_by_reason() {
        let metrics = Metrics::new().unwrap();
        metrics.record_skipped("duplicate");
        metrics.record_skipped("duplicate");
        metrics.record_skipped("unknown_kind");
        assert_eq!(
            metrics.events_skipped.with_label_values(&["duplicate"]).get(),
            2
        );
        assert_eq!(
            metrics
                .events_skipped
                .with_label_values(&["unknown_kind"])
                .get(),
            1
        );
    }

    #[test]
    fn test_update_checkpoint_block() {
        let metrics = Metrics::new().unwrap();
        metrics.update_checkpoint_block(1234);
        assert_eq!(metrics.checkpoint_block.get(), 1234);
    }
}

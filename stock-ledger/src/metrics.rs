//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `stock_ledger_operations_total` - Committed engine operations
//! - `stock_ledger_movements_total` - Quantity-change legs committed
//! - `stock_ledger_conflict_retries_total` - Commits aborted by concurrent writers
//! - `stock_ledger_insufficient_stock_total` - Operations rejected by the non-negativity guard
//! - `stock_ledger_audit_failures_total` - Movement-log appends that failed after commit
//! - `stock_ledger_commit_duration_seconds` - Transaction latency histogram

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed engine operations
    pub operations_total: IntCounter,

    /// Quantity-change legs committed
    pub movements_total: IntCounter,

    /// Commits aborted by concurrent writers
    pub conflict_retries_total: IntCounter,

    /// Operations rejected by the non-negativity guard
    pub insufficient_stock_total: IntCounter,

    /// Movement-log appends that failed after a committed mutation
    pub audit_failures_total: IntCounter,

    /// Transaction latency histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounter::with_opts(Opts::new(
            "stock_ledger_operations_total",
            "Committed engine operations",
        ))?;
        registry.register(Box::new(operations_total.clone()))?;

        let movements_total = IntCounter::with_opts(Opts::new(
            "stock_ledger_movements_total",
            "Quantity-change legs committed",
        ))?;
        registry.register(Box::new(movements_total.clone()))?;

        let conflict_retries_total = IntCounter::with_opts(Opts::new(
            "stock_ledger_conflict_retries_total",
            "Commits aborted by concurrent writers",
        ))?;
        registry.register(Box::new(conflict_retries_total.clone()))?;

        let insufficient_stock_total = IntCounter::with_opts(Opts::new(
            "stock_ledger_insufficient_stock_total",
            "Operations rejected by the non-negativity guard",
        ))?;
        registry.register(Box::new(insufficient_stock_total.clone()))?;

        let audit_failures_total = IntCounter::with_opts(Opts::new(
            "stock_ledger_audit_failures_total",
            "Movement-log appends that failed after commit",
        ))?;
        registry.register(Box::new(audit_failures_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "stock_ledger_commit_duration_seconds",
                "Transaction latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            operations_total,
            movements_total,
            conflict_retries_total,
            insufficient_stock_total,
            audit_failures_total,
            commit_duration,
            registry,
        })
    }

    /// Record a committed operation and its legs
    pub fn record_operation(&self, movement_count: usize) {
        self.operations_total.inc();
        self.movements_total.inc_by(movement_count as u64);
    }

    /// Record a conflict-aborted commit attempt
    pub fn record_conflict_retry(&self) {
        self.conflict_retries_total.inc();
    }

    /// Record a non-negativity rejection
    pub fn record_insufficient_stock(&self) {
        self.insufficient_stock_total.inc();
    }

    /// Record a failed post-commit log append
    pub fn record_audit_failure(&self) {
        self.audit_failures_total.inc();
    }

    /// Record transaction latency
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("operations_total", &self.operations_total.get())
            .field("conflict_retries_total", &self.conflict_retries_total.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.operations_total.get(), 0);
        assert_eq!(metrics.conflict_retries_total.get(), 0);
    }

    #[test]
    fn test_record_operation_counts_legs() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation(2);
        metrics.record_operation(1);
        assert_eq!(metrics.operations_total.get(), 2);
        assert_eq!(metrics.movements_total.get(), 3);
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors must not collide on registration
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_conflict_retry();
        assert_eq!(a.conflict_retries_total.get(), 1);
        assert_eq!(b.conflict_retries_total.get(), 0);
    }
}

//! Metrics collection for the transaction manager
//!
//! Each `Txm` owns its own registry so several managers in one process
//! never share counters.

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

pub struct TxmMetrics {
    registry: Registry,

    // Counters
    pub enqueued: IntCounter,
    pub broadcast: IntCounter,
    pub broadcast_retries: IntCounter,
    pub confirmed: IntCounter,
    pub finalized: IntCounter,
    pub retries: IntCounter,
    pub energy_bumps: IntCounter,
    pub reorgs: IntCounter,
    pub fatal: IntCounter,
    pub reaped: IntCounter,

    // Gauges
    pub queue_depth: IntGauge,
    pub unconfirmed: IntGauge,
}

impl TxmMetrics {
    /// Create a new metrics instance with all collectors registered
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let enqueued = IntCounter::with_opts(Opts::new(
            "txm_enqueued_total",
            "Transactions accepted by enqueue",
        ))?;
        let broadcast = IntCounter::with_opts(Opts::new(
            "txm_broadcast_total",
            "Successful broadcasts, including rebroadcasts",
        ))?;
        let broadcast_retries = IntCounter::with_opts(Opts::new(
            "txm_broadcast_retries_total",
            "Broadcast retries after busy/unsolidified node responses",
        ))?;
        let confirmed = IntCounter::with_opts(Opts::new(
            "txm_confirmed_total",
            "Transactions observed in a block",
        ))?;
        let finalized = IntCounter::with_opts(Opts::new(
            "txm_finalized_total",
            "Transactions observed in a solidified block",
        ))?;
        let retries = IntCounter::with_opts(Opts::new(
            "txm_retries_total",
            "Transactions resubmitted by the confirm loop",
        ))?;
        let energy_bumps = IntCounter::with_opts(Opts::new(
            "txm_energy_bumps_total",
            "Resubmissions with a bumped fee limit",
        ))?;
        let reorgs = IntCounter::with_opts(Opts::new(
            "txm_reorgs_total",
            "Confirmed transactions pushed back to broadcasted",
        ))?;
        let fatal = IntCounter::with_opts(Opts::new(
            "txm_fatal_total",
            "Transactions marked fatally errored",
        ))?;
        let reaped = IntCounter::with_opts(Opts::new(
            "txm_reaped_total",
            "Finished transactions evicted after retention",
        ))?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "txm_queue_depth",
            "Transactions queued but not yet broadcast",
        ))?;
        let unconfirmed = IntGauge::with_opts(Opts::new(
            "txm_unconfirmed",
            "Broadcasted transactions awaiting confirmation",
        ))?;

        registry.register(Box::new(enqueued.clone()))?;
        registry.register(Box::new(broadcast.clone()))?;
        registry.register(Box::new(broadcast_retries.clone()))?;
        registry.register(Box::new(confirmed.clone()))?;
        registry.register(Box::new(finalized.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(energy_bumps.clone()))?;
        registry.register(Box::new(reorgs.clone()))?;
        registry.register(Box::new(fatal.clone()))?;
        registry.register(Box::new(reaped.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(unconfirmed.clone()))?;

        Ok(Self {
            registry,
            enqueued,
            broadcast,
            broadcast_retries,
            confirmed,
            finalized,
            retries,
            energy_bumps,
            reorgs,
            fatal,
            reaped,
            queue_depth,
            unconfirmed,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_independent() {
        let a = TxmMetrics::new().unwrap();
        let b = TxmMetrics::new().unwrap();
        a.enqueued.inc();
        a.enqueued.inc();
        assert_eq!(a.enqueued.get(), 2);
        assert_eq!(b.enqueued.get(), 0);
    }

    #[test]
    fn test_gather_text() {
        let metrics = TxmMetrics::new().unwrap();
        metrics.reorgs.inc();
        metrics.queue_depth.set(3);
        let text = metrics.gather_text();
        assert!(text.contains("txm_reorgs_total 1"));
        assert!(text.contains("txm_queue_depth 3"));
    }
}

//! Reap loop: evicts finished transactions after the retention period

use super::TxmInner;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

pub(crate) async fn run_reap_loop(inner: Arc<TxmInner>, mut stop: broadcast::Receiver<()>) {
    let period = inner.config.reap_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(context_id = %inner.logger.context_id(), "Reap loop started");

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => break,
            _ = ticker.tick() => {
                inner.reap(Instant::now());
            }
        }
    }
    info!(context_id = %inner.logger.context_id(), "Reap loop stopped");
}

impl TxmInner {
    /// Sweep every account; returns the number of transactions removed
    pub(crate) fn reap(&self, now: Instant) -> usize {
        let mut reaped = 0;
        for (address, store) in self.account_store.get_all() {
            let n = store.reap(now);
            if n > 0 {
                debug!(account = %address, reaped = n, "Reaped finished transactions");
            }
            reaped += n;
        }
        self.metrics.reaped.inc_by(reaped as u64);
        reaped
    }
}

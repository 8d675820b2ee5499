//! Confirm loop: receipt polling, retry policy and reorg recovery

use super::tx::TronTx;
use super::txstore::{ConfirmedTx, TxStore, UnconfirmedTx};
use super::TxmInner;
use crate::config::ResultCodeTable;
use crate::ledger::{ChainView, TransactionInfo};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const OUT_OF_ENERGY: &str = "OUT_OF_ENERGY";
const OUT_OF_TIME: &str = "OUT_OF_TIME";

/// What a receipt means for the transaction that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Success,
    OutOfEnergy,
    OutOfTime,
    /// Deterministic execution failure; resending cannot help
    Fatal(String),
    /// Failed for a reason we do not recognize
    Unknown(String),
}

impl ReceiptOutcome {
    /// Error taxonomy label
    pub fn category(&self) -> &'static str {
        match self {
            ReceiptOutcome::Success => "success",
            ReceiptOutcome::OutOfEnergy => "resource",
            ReceiptOutcome::OutOfTime | ReceiptOutcome::Unknown(_) => "transient",
            ReceiptOutcome::Fatal(_) => "fatal",
        }
    }
}

/// Classify a receipt against the result-code table
pub fn classify_receipt(info: &TransactionInfo, codes: &ResultCodeTable) -> ReceiptOutcome {
    let code = info.receipt_result.as_deref().unwrap_or("DEFAULT");
    match code {
        OUT_OF_ENERGY => ReceiptOutcome::OutOfEnergy,
        OUT_OF_TIME => ReceiptOutcome::OutOfTime,
        c if codes.is_fatal(c) => ReceiptOutcome::Fatal(c.to_string()),
        c if codes.is_success(c) && !info.is_failed() => ReceiptOutcome::Success,
        c => ReceiptOutcome::Unknown(c.to_string()),
    }
}

/// Kind of retry decided for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryKind {
    EnergyBump,
    OutOfTime,
    Plain,
}

pub(crate) async fn run_confirm_loop(inner: Arc<TxmInner>, mut stop: broadcast::Receiver<()>) {
    let period = inner.config.confirm_poll_interval();
    // first poll one period after start
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(context_id = %inner.logger.context_id(), "Confirm loop started");

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = stop.recv() => break,
            _ = inner.confirm_tick() => {}
        }
    }
    info!(context_id = %inner.logger.context_id(), "Confirm loop stopped");
}

impl TxmInner {
    /// One polling pass over every account
    pub(crate) async fn confirm_tick(&self) {
        for (_, store) in self.account_store.get_all() {
            // finality first, so an entry confirmed in this pass waits a full interval
            for confirmed in store.get_confirmed() {
                self.check_confirmed(&store, confirmed).await;
            }

            let unconfirmed = store.get_unconfirmed();
            if unconfirmed.is_empty() {
                continue;
            }
            let mut now_ms = None;
            for entry in unconfirmed {
                self.check_unconfirmed(&store, entry, &mut now_ms).await;
            }
        }
        self.metrics
            .unconfirmed
            .set(self.account_store.get_total_inflight_count() as i64);
    }

    async fn check_confirmed(&self, store: &TxStore, entry: ConfirmedTx) {
        match self
            .client
            .get_transaction_info_by_id(&entry.hash, ChainView::Solid)
            .await
        {
            Ok(Some(info)) if info.block_number == entry.block_number => {
                if let Err(e) = store.on_finalized(&entry.id) {
                    warn!(tx_id = %entry.id, error = %e, "Finalize rejected");
                    return;
                }
                self.metrics.finalized.inc();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(tx_id = %entry.id, error = %e, retryable = e.is_retryable(), "Solid receipt query failed");
                return;
            }
        }

        let reorged = match self
            .client
            .get_transaction_info_by_id(&entry.hash, ChainView::Tip)
            .await
        {
            Ok(None) => true,
            Ok(Some(info)) => info.block_number != entry.block_number,
            Err(e) => {
                debug!(tx_id = %entry.id, error = %e, "Tip receipt query failed");
                false
            }
        };
        if reorged {
            self.logger
                .log_reorg(&entry.id, &entry.hash, entry.block_number);
            match store.on_reorg(&entry.id) {
                Ok(()) => self.metrics.reorgs.inc(),
                Err(e) => warn!(tx_id = %entry.id, error = %e, "Reorg transition rejected"),
            }
        }
    }

    async fn check_unconfirmed(
        &self,
        store: &TxStore,
        entry: UnconfirmedTx,
        now_ms: &mut Option<i64>,
    ) {
        let receipt = match self
            .client
            .get_transaction_info_by_id(&entry.hash, ChainView::Tip)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                debug!(
                    tx_id = %entry.id,
                    error = %e,
                    category = e.category(),
                    retryable = e.is_retryable(),
                    "Receipt query failed"
                );
                return;
            }
        };

        let Some(info) = receipt else {
            let now = match *now_ms {
                Some(now) => now,
                None => match self.client.get_now_block().await {
                    Ok(block) => *now_ms.insert(block.timestamp_ms),
                    Err(e) => {
                        debug!(error = %e, "Ledger clock unavailable");
                        return;
                    }
                },
            };
            if now > entry.expiration_ms {
                self.retry(store, &entry.id, "expired without receipt", RetryKind::Plain)
                    .await;
            }
            return;
        };

        let outcome = classify_receipt(&info, &self.config.result_codes);
        debug!(
            tx_id = %entry.id,
            block = info.block_number,
            outcome = outcome.category(),
            "Receipt found"
        );
        match outcome {
            ReceiptOutcome::Success => match store.on_confirmed(&entry.id, info.block_number) {
                Ok(()) => self.metrics.confirmed.inc(),
                Err(e) => warn!(tx_id = %entry.id, error = %e, "Confirm rejected"),
            },
            ReceiptOutcome::OutOfEnergy => {
                self.retry(store, &entry.id, OUT_OF_ENERGY, RetryKind::EnergyBump)
                    .await
            }
            ReceiptOutcome::OutOfTime => {
                self.retry(store, &entry.id, OUT_OF_TIME, RetryKind::OutOfTime)
                    .await
            }
            ReceiptOutcome::Fatal(code) => {
                let reason = match &info.res_message {
                    Some(msg) => format!("{code}: {msg}"),
                    None => code,
                };
                if let Err(e) = store.on_errored(&entry.id) {
                    warn!(tx_id = %entry.id, error = %e, "Error transition rejected");
                    return;
                }
                self.fail(store, &entry.id, &reason);
            }
            ReceiptOutcome::Unknown(code) => {
                self.retry(store, &entry.id, &code, RetryKind::Plain).await
            }
        }
    }

    /// Move a failed `Broadcasted` attempt to `Errored` and requeue it, or
    /// make it fatal once a retry ceiling is reached
    async fn retry(&self, store: &TxStore, id: &str, reason: &str, kind: RetryKind) {
        let mut tx = match store.on_errored(id) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(tx_id = %id, error = %e, "Error transition rejected");
                return;
            }
        };

        if tx.attempt >= self.config.max_attempts {
            return self.fail(store, id, &format!("{reason}: attempt ceiling reached"));
        }
        if kind == RetryKind::OutOfTime {
            if tx.out_of_time_errors >= self.config.max_out_of_time_errors {
                return self.fail(store, id, &format!("{reason}: out-of-time ceiling reached"));
            }
            tx.out_of_time_errors += 1;
        }
        if kind == RetryKind::EnergyBump {
            tx.energy_bump_times += 1;
            self.metrics.energy_bumps.inc();
        }
        tx.attempt += 1;
        if let Err(e) = store.record_counters(&tx) {
            warn!(tx_id = %id, error = %e, "Failed to record retry counters");
            return;
        }

        self.metrics.retries.inc();
        self.logger
            .log_retry(&tx, reason, kind == RetryKind::EnergyBump);
        self.requeue(store, tx).await;
    }

    async fn requeue(&self, store: &TxStore, tx: TronTx) {
        let id = tx.id.clone();
        if self.sender.send(tx).await.is_err() {
            // only happens while shutting down
            self.fail(store, &id, "broadcast queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(code: Option<&str>, failed: bool) -> TransactionInfo {
        TransactionInfo {
            id: "h".into(),
            block_number: 1,
            receipt_result: code.map(str::to_string),
            result: failed.then(|| "FAILED".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_classification() {
        let codes = ResultCodeTable::default();
        assert_eq!(
            classify_receipt(&receipt(Some("SUCCESS"), false), &codes),
            ReceiptOutcome::Success
        );
        assert_eq!(classify_receipt(&receipt(None, false), &codes), ReceiptOutcome::Success);
        assert_eq!(
            classify_receipt(&receipt(Some("OUT_OF_ENERGY"), true), &codes),
            ReceiptOutcome::OutOfEnergy
        );
        assert_eq!(
            classify_receipt(&receipt(Some("OUT_OF_TIME"), true), &codes),
            ReceiptOutcome::OutOfTime
        );
        assert_eq!(
            classify_receipt(&receipt(Some("REVERT"), true), &codes),
            ReceiptOutcome::Fatal("REVERT".into())
        );
        assert_eq!(
            classify_receipt(&receipt(Some("SUCCESS"), true), &codes),
            ReceiptOutcome::Unknown("SUCCESS".into())
        );
        assert_eq!(
            classify_receipt(&receipt(Some("UNKNOWN"), true), &codes).category(),
            "transient"
        );
    }

    #[test]
    fn test_custom_fatal_table() {
        let codes = ResultCodeTable {
            fatal: vec!["PRECOMPILED_CONTRACT".into()],
            success: vec!["SUCCESS".into()],
        };
        assert!(matches!(
            classify_receipt(&receipt(Some("PRECOMPILED_CONTRACT"), true), &codes),
            ReceiptOutcome::Fatal(_)
        ));
        // REVERT is no longer listed
        assert!(matches!(
            classify_receipt(&receipt(Some("REVERT"), true), &codes),
            ReceiptOutcome::Unknown(_)
        ));
    }
}

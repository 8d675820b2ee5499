//! Logging setup and structured transaction events

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::txm::{TronTx, TxState};

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects debug output for this crate.
pub fn init_logging(verbose: bool, json: bool) -> anyhow::Result<()> {
    let default_filter = if verbose {
        "tron_relayer=debug,info"
    } else {
        "tron_relayer=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

/// Structured logger for transaction lifecycle events
///
/// Every event carries the TXM instance name as `context_id` so logs from
/// several managers in one process can be told apart.
#[derive(Debug, Clone)]
pub struct TxLogger {
    context_id: String,
}

impl TxLogger {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_enqueued(&self, tx: &TronTx) {
        tracing::debug!(
            context_id = %self.context_id,
            tx_id = %tx.id,
            from = %tx.from_address,
            contract = %tx.contract_address,
            method = %tx.method,
            "Transaction enqueued"
        );
    }

    pub fn log_broadcasted(&self, tx: &TronTx, hash: &str, fee_limit: i64) {
        tracing::info!(
            context_id = %self.context_id,
            tx_id = %tx.id,
            hash = %hash,
            attempt = tx.attempt,
            energy_bumps = tx.energy_bump_times,
            fee_limit = fee_limit,
            "Transaction broadcasted"
        );
    }

    pub fn log_transition(&self, tx_id: &str, from: TxState, to: TxState) {
        tracing::debug!(
            context_id = %self.context_id,
            tx_id = %tx_id,
            from = ?from,
            to = ?to,
            "State transition"
        );
    }

    pub fn log_retry(&self, tx: &TronTx, reason: &str, bump_energy: bool) {
        tracing::warn!(
            context_id = %self.context_id,
            tx_id = %tx.id,
            attempt = tx.attempt,
            energy_bumps = tx.energy_bump_times,
            out_of_time_errors = tx.out_of_time_errors,
            bump_energy = bump_energy,
            reason = %reason,
            "Retrying transaction"
        );
    }

    pub fn log_fatal(&self, tx_id: &str, reason: &str) {
        tracing::error!(
            context_id = %self.context_id,
            tx_id = %tx_id,
            reason = %reason,
            "Transaction fatally errored"
        );
    }

    pub fn log_reorg(&self, tx_id: &str, hash: &str, confirmed_block: i64) {
        tracing::warn!(
            context_id = %self.context_id,
            tx_id = %tx_id,
            hash = %hash,
            confirmed_block = confirmed_block,
            "Confirmed transaction no longer observed at its block, re-polling"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            message = %message,
            "Warning"
        );
    }
}

//! Broadcast loop: estimate, build, sign, send

use super::energy::padded_fee_limit;
use super::tx::TronTx;
use super::TxmInner;
use crate::ledger::BroadcastReturn;
use crate::tx_builder::{abi, build_transaction, BlockRef, ContractCallData, SignedTransaction};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Why a send did not go through
#[derive(Debug)]
pub(crate) enum BroadcastFailure {
    /// Node kept answering busy until the retry window closed
    GaveUp { retries: u32, last: BroadcastReturn },
    Rejected(String),
}

impl std::fmt::Display for BroadcastFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastFailure::GaveUp { retries, last } => write!(
                f,
                "node busy after {} retries ({})",
                retries,
                last.code.as_deref().unwrap_or("unknown")
            ),
            BroadcastFailure::Rejected(reason) => f.write_str(reason),
        }
    }
}

pub(crate) async fn run_broadcast_loop(
    inner: Arc<TxmInner>,
    mut rx: mpsc::Receiver<TronTx>,
    mut stop: broadcast::Receiver<()>,
) {
    info!(context_id = %inner.logger.context_id(), "Broadcast loop started");
    loop {
        let tx = tokio::select! {
            biased;
            _ = stop.recv() => break,
            next = rx.recv() => match next {
                Some(tx) => tx,
                None => break,
            },
        };
        inner.metrics.queue_depth.set(inner.queue_len() as i64);

        tokio::select! {
            biased;
            _ = stop.recv() => break,
            _ = inner.process_broadcast(tx) => {}
        }
    }
    info!(context_id = %inner.logger.context_id(), "Broadcast loop stopped");
}

impl TxmInner {
    /// One attempt for `tx`; every failure here is fatal for the transaction
    pub(crate) async fn process_broadcast(&self, tx: TronTx) {
        let store = self.account_store.get_tx_store(&tx.from_address);

        let fee = match self.estimator.calculate_fee_limit(&tx).await {
            Ok(fee) => fee,
            Err(e) => return self.fail(&store, &tx.id, &format!("energy estimation failed: {e}")),
        };
        let fee_limit = padded_fee_limit(
            fee.fee_limit,
            self.config.energy_multiplier,
            tx.energy_bump_times,
        );

        let signed = match self.build_and_sign(&tx, fee_limit).await {
            Ok(signed) => signed,
            Err(reason) => return self.fail(&store, &tx.id, &reason),
        };
        let expiration = signed.raw_data.expiration;

        match self.broadcast_with_retry(&signed).await {
            Ok(()) => {}
            Err(failure) => return self.fail(&store, &tx.id, &format!("broadcast failed: {failure}")),
        }

        match store.on_broadcasted(&signed.tx_id, expiration, tx.clone()) {
            Ok(()) => {
                self.metrics.broadcast.inc();
                self.logger.log_broadcasted(&tx, &signed.tx_id, fee_limit);
            }
            Err(e) => {
                error!(tx_id = %tx.id, hash = %signed.tx_id, error = %e, "Failed to record broadcast");
                self.fail(&store, &tx.id, &e.to_string());
            }
        }
    }

    async fn build_and_sign(&self, tx: &TronTx, fee_limit: i64) -> Result<SignedTransaction, String> {
        let block = self
            .client
            .get_now_block()
            .await
            .map_err(|e| format!("reference block unavailable: {e}"))?;
        let data = abi::encode_call(&tx.method, &tx.params).map_err(|e| e.to_string())?;
        let block_ref =
            BlockRef::from_block(block.number, &block.id).map_err(|e| e.to_string())?;
        let call = ContractCallData {
            owner_address: tx.from_address,
            contract_address: tx.contract_address,
            call_value: 0,
            data,
        };
        let unsigned = build_transaction(
            &call,
            &block_ref,
            fee_limit,
            block.timestamp_ms,
            Some(block.timestamp_ms.saturating_add(self.config.tx_expiration_ms)),
        )
        .map_err(|e| format!("build failed: {e}"))?;

        let signature = self
            .keystore
            .sign(&tx.from_address, Some(&unsigned.tx_id))
            .await
            .map_err(|e| format!("signing failed: {e}"))?;
        Ok(unsigned.into_signed(signature))
    }

    /// Send, resending the same bytes while the node reports busy or unsolidified
    pub(crate) async fn broadcast_with_retry(
        &self,
        signed: &SignedTransaction,
    ) -> Result<(), BroadcastFailure> {
        let started = Instant::now();
        let delay = self.config.broadcast_retry_delay();
        let max_retry = self.config.broadcast_max_retry();
        let mut retries = 0u32;

        loop {
            let ret = self
                .client
                .broadcast_transaction(signed)
                .await
                .map_err(|e| BroadcastFailure::Rejected(e.to_string()))?;
            if ret.result {
                return Ok(());
            }
            if !ret.is_busy() {
                return Err(BroadcastFailure::Rejected(format!(
                    "{}: {}",
                    ret.code.as_deref().unwrap_or("UNKNOWN"),
                    ret.message.as_deref().unwrap_or_default()
                )));
            }
            if started.elapsed() + delay > max_retry {
                return Err(BroadcastFailure::GaveUp { retries, last: ret });
            }
            retries += 1;
            self.metrics.broadcast_retries.inc();
            debug!(
                hash = %signed.tx_id,
                code = ?ret.code,
                retries,
                "Node busy, retrying broadcast"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

//! Transaction manager
//!
//! Turns "call method M on contract C from account A" requests into signed,
//! fee-bounded ledger transactions and tracks them to finality.
//!
//! ## Layout
//!
//! - **tx**: `TronTx`, the `TxState` machine, requests and the external status view
//! - **txstore** / **account_store**: per-account state and the address registry
//! - **energy**: energy estimation, unit price cache, fee padding
//! - **broadcast** / **confirm** / **reaper**: the three background loops
//!
//! Callers only touch the bounded broadcast queue (through [`Txm::enqueue`])
//! and lock-protected store state. Network calls happen inside the loops.

mod account_store;
mod broadcast;
mod confirm;
mod energy;
mod errors;
mod reaper;
mod tx;
mod txstore;

pub use account_store::AccountStore;
pub use confirm::{classify_receipt, ReceiptOutcome};
pub use energy::{padded_fee_limit, parse_energy_price, EnergyEstimator, FeeLimit};
pub use errors::{EstimateError, TxStoreError, TxmError};
pub use tx::{
    idempotency_key, StatusChecker, TransactionStatus, TronTx, TxMeta, TxRequest, TxState,
};
pub use txstore::{ConfirmedTx, TxStore, UnconfirmedTx};

use crate::config::TronTxmConfig;
use crate::keystore::Keystore;
use crate::ledger::FullNodeClient;
use crate::logging::TxLogger;
use crate::metrics::TxmMetrics;
use crate::tx_builder::abi;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast as stop_channel, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of a `Txm`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Built, loops not running
    Idle = 0,
    Running = 1,
    /// Stopped for good
    Closed = 2,
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

/// A spawned background loop
pub struct WorkerHandle {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
}

/// State shared between the public handle and the loops
pub(crate) struct TxmInner {
    pub(crate) config: TronTxmConfig,
    pub(crate) client: Arc<dyn FullNodeClient>,
    pub(crate) keystore: Arc<dyn Keystore>,
    pub(crate) status_checker: Option<Arc<dyn StatusChecker>>,
    pub(crate) estimator: EnergyEstimator,
    pub(crate) account_store: AccountStore,
    pub(crate) metrics: TxmMetrics,
    pub(crate) logger: TxLogger,
    pub(crate) sender: mpsc::Sender<TronTx>,
}

impl TxmInner {
    /// Transactions sitting in the broadcast queue
    pub(crate) fn queue_len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Mark `id` fatally errored and record why
    pub(crate) fn fail(&self, store: &TxStore, id: &str, reason: &str) {
        match store.on_fatal_error(id) {
            Ok(()) => {
                self.metrics.fatal.inc();
                self.logger.log_fatal(id, reason);
            }
            Err(e) => warn!(tx_id = %id, reason = %reason, error = %e, "Fatal transition rejected"),
        }
    }
}

/// Assembles a [`Txm`]
pub struct TxmBuilder {
    config: TronTxmConfig,
    client: Arc<dyn FullNodeClient>,
    keystore: Arc<dyn Keystore>,
    status_checker: Option<Arc<dyn StatusChecker>>,
    name: String,
}

impl TxmBuilder {
    pub fn new(
        config: TronTxmConfig,
        client: Arc<dyn FullNodeClient>,
        keystore: Arc<dyn Keystore>,
    ) -> Self {
        Self {
            config,
            client,
            keystore,
            status_checker: None,
            name: "tron-txm".to_string(),
        }
    }

    /// Enables idempotency keys for single-message requests
    pub fn status_checker(mut self, checker: Arc<dyn StatusChecker>) -> Self {
        self.status_checker = Some(checker);
        self
    }

    /// Instance name carried in every log line
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn build(self) -> Result<Txm, TxmError> {
        self.config.validate()?;
        let logger = TxLogger::new(self.name);
        let (sender, receiver) = mpsc::channel(self.config.broadcast_chan_size);
        let (stop_tx, _) = stop_channel::channel(4);

        let inner = TxmInner {
            estimator: EnergyEstimator::new(
                self.client.clone(),
                self.config.energy_price_refresh(),
                self.config.default_energy_unit_price,
                logger.clone(),
            ),
            account_store: AccountStore::new(self.config.retention_period(), logger.clone()),
            metrics: TxmMetrics::new()?,
            config: self.config,
            client: self.client,
            keystore: self.keystore,
            status_checker: self.status_checker,
            logger,
            sender,
        };

        Ok(Txm {
            inner: Arc::new(inner),
            receiver: Mutex::new(Some(receiver)),
            stop_tx,
            workers: Mutex::new(Vec::new()),
            state: AtomicU8::new(LifecycleState::Idle as u8),
        })
    }
}

/// Transaction manager handle
pub struct Txm {
    inner: Arc<TxmInner>,
    receiver: Mutex<Option<mpsc::Receiver<TronTx>>>,
    stop_tx: stop_channel::Sender<()>,
    workers: Mutex<Vec<WorkerHandle>>,
    state: AtomicU8,
}

impl Txm {
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::Acquire))
    }

    /// Spawn the broadcast, confirm and reap loops
    pub fn start(&self) -> Result<(), TxmError> {
        if let Err(current) = self.state.compare_exchange(
            LifecycleState::Idle as u8,
            LifecycleState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match LifecycleState::from(current) {
                LifecycleState::Closed => TxmError::Closed,
                _ => TxmError::AlreadyStarted,
            });
        }
        let receiver = self.receiver.lock().take().ok_or(TxmError::AlreadyStarted)?;

        let workers = vec![
            WorkerHandle {
                name: "broadcast",
                handle: tokio::spawn(broadcast::run_broadcast_loop(
                    self.inner.clone(),
                    receiver,
                    self.stop_tx.subscribe(),
                )),
            },
            WorkerHandle {
                name: "confirm",
                handle: tokio::spawn(confirm::run_confirm_loop(
                    self.inner.clone(),
                    self.stop_tx.subscribe(),
                )),
            },
            WorkerHandle {
                name: "reap",
                handle: tokio::spawn(reaper::run_reap_loop(
                    self.inner.clone(),
                    self.stop_tx.subscribe(),
                )),
            },
        ];
        self.workers.lock().extend(workers);
        info!(context_id = %self.inner.logger.context_id(), "Transaction manager started");
        Ok(())
    }

    /// Signal every loop to stop and wait for all of them
    pub async fn close(&self) {
        let previous = self.state.swap(LifecycleState::Closed as u8, Ordering::AcqRel);
        if LifecycleState::from(previous) == LifecycleState::Closed {
            return;
        }
        let _ = self.stop_tx.send(());

        let workers = std::mem::take(&mut *self.workers.lock());
        let results = join_all(
            workers
                .into_iter()
                .map(|worker| async move { (worker.name, worker.handle.await) }),
        )
        .await;
        for (name, result) in results {
            match result {
                Ok(()) => debug!(worker = name, "Worker stopped"),
                Err(e) => error!(worker = name, error = %e, "Worker panicked"),
            }
        }
        info!(context_id = %self.inner.logger.context_id(), "Transaction manager closed");
    }

    /// Validate and queue a contract call; returns its id
    ///
    /// Never waits for queue space: a full queue is reported as
    /// [`TxmError::QueueFull`] and nothing is recorded.
    pub async fn enqueue(&self, request: TxRequest) -> Result<String, TxmError> {
        let result = self.try_enqueue(request).await;
        if let Err(e) = &result {
            debug!(category = e.category(), error = %e, "Enqueue rejected");
        }
        result
    }

    async fn try_enqueue(&self, request: TxRequest) -> Result<String, TxmError> {
        if self.state() == LifecycleState::Closed {
            return Err(TxmError::Closed);
        }
        abi::validate_param_shape(&request.params)?;

        self.inner
            .keystore
            .sign(&request.from, None)
            .await
            .map_err(|e| TxmError::UnknownSigner {
                address: request.from.to_base58(),
                reason: e.to_string(),
            })?;

        let store = self.inner.account_store.get_tx_store(&request.from);

        let message_id = request
            .meta
            .as_ref()
            .and_then(|meta| meta.single_message_id())
            .map(str::to_string);
        let key = match (message_id, &self.inner.status_checker) {
            (Some(message_id), Some(checker)) => {
                let (_, retry_count) = checker
                    .check_message_status(&message_id)
                    .await
                    .map_err(|e| TxmError::StatusChecker(e.to_string()))?;
                let key = idempotency_key(&message_id, retry_count);
                if store.does_idempotency_key_exist(&key) {
                    return Err(TxmError::DuplicateSubmission(key));
                }
                Some(key)
            }
            _ => None,
        };

        let id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut tx = TronTx::new(id.clone(), request);
        tx.idempotency_key = key;

        let permit = match self.inner.sender.try_reserve() {
            Ok(permit) => permit,
            Err(mpsc::error::TrySendError::Full(())) => {
                warn!(tx_id = %id, "Broadcast queue full, rejecting");
                return Err(TxmError::QueueFull(self.inner.config.broadcast_chan_size));
            }
            Err(mpsc::error::TrySendError::Closed(())) => return Err(TxmError::Closed),
        };

        store.on_pending(tx.clone()).map_err(|e| match e {
            TxStoreError::DuplicateIdempotencyKey(key) => TxmError::DuplicateSubmission(key),
            other => TxmError::Store(other),
        })?;
        self.inner.logger.log_enqueued(&tx);
        permit.send(tx);

        self.inner.metrics.enqueued.inc();
        self.inner
            .metrics
            .queue_depth
            .set(self.inner.queue_len() as i64);
        Ok(id)
    }

    /// Coarse status of `id`; `Unknown` once it is untracked or reaped
    pub fn get_transaction_status(&self, id: &str) -> TransactionStatus {
        self.get_state(id)
            .map(TransactionStatus::from)
            .unwrap_or(TransactionStatus::Unknown)
    }

    /// Internal state of `id`, if it is still tracked
    pub fn get_state(&self, id: &str) -> Option<TxState> {
        self.inner
            .account_store
            .find(id)
            .and_then(|store| store.get_status(id))
    }

    /// Snapshot of the tracked transaction `id`
    pub fn get_tx(&self, id: &str) -> Option<TronTx> {
        self.inner
            .account_store
            .find(id)
            .and_then(|store| store.get_tx(id))
    }

    /// `(queued, broadcasted but unconfirmed)`
    pub fn inflight_count(&self) -> (usize, usize) {
        (
            self.inner.queue_len(),
            self.inner.account_store.get_total_inflight_count(),
        )
    }

    pub fn account_store(&self) -> &AccountStore {
        &self.inner.account_store
    }

    pub fn estimator(&self) -> &EnergyEstimator {
        &self.inner.estimator
    }

    pub fn metrics(&self) -> &TxmMetrics {
        &self.inner.metrics
    }

    pub fn config(&self) -> &TronTxmConfig {
        &self.inner.config
    }
}

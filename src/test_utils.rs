//! Test Utilities Module
//!
//! Deterministic stand-ins for the ledger node, the keystore and the external
//! status checker, plus helpers to assemble a `Txm` around them.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::address::TronAddress;
use crate::config::TronTxmConfig;
use crate::keystore::{Keystore, KeystoreError};
use crate::ledger::{
    BlockHeader, BroadcastReturn, ChainView, ContractCall, EstimateEnergyResponse,
    FullNodeClient, LedgerError, TransactionInfo, TriggerConstantResponse,
};
use crate::tx_builder::SignedTransaction;
use crate::txm::{StatusChecker, TransactionStatus, TxRequest, TxState, Txm, TxmBuilder};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Block number the mock chain starts at
pub const MOCK_BASE_BLOCK: i64 = 60_000_000;
/// Ledger timestamp the mock chain starts at
pub const MOCK_BASE_TIMESTAMP_MS: i64 = 1_700_000_000_000;
/// Mock block interval
pub const MOCK_BLOCK_TIME_MS: i64 = 3_000;

/// Scripted receipt answer for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReceipt {
    /// Node has no receipt
    Missing,
    Success { block: i64 },
    Failed { code: String, block: i64 },
}

impl MockReceipt {
    pub fn failed(code: &str, block: i64) -> Self {
        MockReceipt::Failed {
            code: code.to_string(),
            block,
        }
    }

    fn to_info(&self, hash: &str) -> Option<TransactionInfo> {
        match self {
            MockReceipt::Missing => None,
            MockReceipt::Success { block } => Some(TransactionInfo {
                id: hash.to_string(),
                block_number: *block,
                receipt_result: Some("SUCCESS".to_string()),
                ..Default::default()
            }),
            MockReceipt::Failed { code, block } => Some(TransactionInfo {
                id: hash.to_string(),
                block_number: *block,
                receipt_result: Some(code.clone()),
                result: Some("FAILED".to_string()),
                ..Default::default()
            }),
        }
    }
}

#[derive(Debug, Default)]
struct ReceiptScript {
    tip: VecDeque<MockReceipt>,
    solid: VecDeque<MockReceipt>,
}

/// Pop the next answer, repeating the last one forever
fn next_answer(queue: &mut VecDeque<MockReceipt>) -> Option<MockReceipt> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[derive(Debug)]
struct NodeState {
    estimate_supported: bool,
    energy_required: i64,
    constant_energy: (i64, i64),
    constant_revert: Option<String>,
    energy_prices: String,
    broadcast_results: VecDeque<BroadcastReturn>,
    broadcasts: Vec<SignedTransaction>,
    broadcast_blocks: Vec<i64>,
    hash_index: HashMap<String, usize>,
    scripts: HashMap<usize, ReceiptScript>,
    estimate_calls: usize,
    trigger_calls: usize,
    price_calls: usize,
    broadcast_attempts: usize,
}

/// In-memory full node
///
/// The chain clock follows `tokio::time`, so paused-time tests move it with
/// `sleep`/`advance`. Receipts for the n-th accepted broadcast can be scripted
/// with [`MockFullNode::script_receipts`]; unscripted broadcasts succeed one
/// block after they were sent, in both the tip and solid views.
pub struct MockFullNode {
    state: Mutex<NodeState>,
    started: Instant,
}

impl MockFullNode {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NodeState {
                estimate_supported: true,
                energy_required: 14_000,
                constant_energy: (14_000, 0),
                constant_revert: None,
                energy_prices: "0:100,1606537680000:420".to_string(),
                broadcast_results: VecDeque::new(),
                broadcasts: Vec::new(),
                broadcast_blocks: Vec::new(),
                hash_index: HashMap::new(),
                scripts: HashMap::new(),
                estimate_calls: 0,
                trigger_calls: 0,
                price_calls: 0,
                broadcast_attempts: 0,
            }),
            started: Instant::now(),
        }
    }

    /// Current head block according to the mock clock
    pub fn now_block(&self) -> BlockHeader {
        let elapsed = self.started.elapsed().as_millis() as i64;
        let number = MOCK_BASE_BLOCK + elapsed / MOCK_BLOCK_TIME_MS;
        BlockHeader {
            number,
            id: format!(
                "{:016x}{:048x}",
                number,
                (number as u128).wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ),
            timestamp_ms: MOCK_BASE_TIMESTAMP_MS + elapsed,
        }
    }

    pub fn set_estimate_energy_supported(&self, supported: bool) {
        self.state.lock().estimate_supported = supported;
    }

    pub fn set_energy_required(&self, energy: i64) {
        self.state.lock().energy_required = energy;
    }

    pub fn set_constant_energy(&self, used: i64, penalty: i64) {
        self.state.lock().constant_energy = (used, penalty);
    }

    pub fn set_constant_revert(&self, message: Option<&str>) {
        self.state.lock().constant_revert = message.map(str::to_string);
    }

    pub fn set_energy_prices(&self, feed: &str) {
        self.state.lock().energy_prices = feed.to_string();
    }

    /// Queue an answer for the next broadcast call (default: accepted)
    pub fn push_broadcast_result(&self, result: BroadcastReturn) {
        self.state.lock().broadcast_results.push_back(result);
    }

    /// Script receipts for the `index`-th accepted broadcast (0-based)
    pub fn script_receipts(&self, index: usize, tip: Vec<MockReceipt>, solid: Vec<MockReceipt>) {
        self.state.lock().scripts.insert(
            index,
            ReceiptScript {
                tip: tip.into(),
                solid: solid.into(),
            },
        );
    }

    /// Accepted broadcasts, in order
    pub fn broadcasts(&self) -> Vec<SignedTransaction> {
        self.state.lock().broadcasts.clone()
    }

    pub fn broadcast_attempts(&self) -> usize {
        self.state.lock().broadcast_attempts
    }

    pub fn estimate_energy_calls(&self) -> usize {
        self.state.lock().estimate_calls
    }

    pub fn trigger_constant_calls(&self) -> usize {
        self.state.lock().trigger_calls
    }

    pub fn energy_price_calls(&self) -> usize {
        self.state.lock().price_calls
    }
}

impl Default for MockFullNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FullNodeClient for MockFullNode {
    async fn estimate_energy(
        &self,
        _call: &ContractCall,
    ) -> Result<EstimateEnergyResponse, LedgerError> {
        let mut state = self.state.lock();
        state.estimate_calls += 1;
        if !state.estimate_supported {
            return Err(LedgerError::EstimateEnergyUnsupported);
        }
        Ok(EstimateEnergyResponse {
            energy_required: state.energy_required,
        })
    }

    async fn trigger_constant_contract(
        &self,
        _call: &ContractCall,
    ) -> Result<TriggerConstantResponse, LedgerError> {
        let mut state = self.state.lock();
        state.trigger_calls += 1;
        Ok(TriggerConstantResponse {
            energy_used: state.constant_energy.0,
            energy_penalty: state.constant_energy.1,
            constant_result: Vec::new(),
            revert_message: state.constant_revert.clone(),
        })
    }

    async fn get_energy_prices(&self) -> Result<String, LedgerError> {
        let mut state = self.state.lock();
        state.price_calls += 1;
        Ok(state.energy_prices.clone())
    }

    async fn get_now_block(&self) -> Result<BlockHeader, LedgerError> {
        Ok(self.now_block())
    }

    async fn broadcast_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<BroadcastReturn, LedgerError> {
        let block = self.now_block().number;
        let mut state = self.state.lock();
        state.broadcast_attempts += 1;
        let result = state
            .broadcast_results
            .pop_front()
            .unwrap_or_else(|| BroadcastReturn::success(tx.tx_id.clone()));
        if result.result {
            let index = state.broadcasts.len();
            state.hash_index.insert(tx.tx_id.clone(), index);
            state.broadcasts.push(tx.clone());
            state.broadcast_blocks.push(block);
        }
        Ok(result)
    }

    async fn get_transaction_info_by_id(
        &self,
        hash: &str,
        view: ChainView,
    ) -> Result<Option<TransactionInfo>, LedgerError> {
        let mut state = self.state.lock();
        let Some(&index) = state.hash_index.get(hash) else {
            return Ok(None);
        };
        let default = MockReceipt::Success {
            block: state.broadcast_blocks[index] + 1,
        };
        let answer = state.scripts.get_mut(&index).and_then(|script| match view {
            ChainView::Tip => next_answer(&mut script.tip),
            ChainView::Solid => next_answer(&mut script.solid),
        });
        Ok(answer.unwrap_or(default).to_info(hash))
    }
}

/// Keystore that knows a fixed set of addresses and signs deterministically
pub struct MockKeystore {
    known: HashSet<TronAddress>,
    primary: TronAddress,
    contract: TronAddress,
}

impl MockKeystore {
    pub fn new() -> Self {
        let primary = TronAddress::from_evm_bytes(&[0x11; 20]);
        Self {
            known: HashSet::from([primary]),
            primary,
            contract: TronAddress::from_evm_bytes(&[0xcc; 20]),
        }
    }

    pub fn with_address(mut self, address: TronAddress) -> Self {
        self.known.insert(address);
        self
    }

    pub fn address(&self) -> TronAddress {
        self.primary
    }

    /// A `transfer(address,uint256)` call from the primary address
    pub fn request(&self) -> TxRequest {
        TxRequest::new(self.primary, self.contract, "transfer(address,uint256)").with_params(vec![
            "address".into(),
            self.contract.to_base58().into(),
            "uint256".into(),
            "1000".into(),
        ])
    }
}

impl Default for MockKeystore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Keystore for MockKeystore {
    async fn sign(
        &self,
        address: &TronAddress,
        digest: Option<&[u8]>,
    ) -> Result<Vec<u8>, KeystoreError> {
        if !self.known.contains(address) {
            return Err(KeystoreError::UnknownAddress(*address));
        }
        let Some(digest) = digest else {
            return Ok(Vec::new());
        };
        let mut hasher = Sha256::new();
        hasher.update(address.as_bytes());
        hasher.update(digest);
        let half = hasher.finalize();
        let mut sig = Vec::with_capacity(65);
        sig.extend_from_slice(&half);
        sig.extend_from_slice(&half);
        sig.push(0);
        Ok(sig)
    }

    async fn accounts(&self) -> Vec<TronAddress> {
        self.known.iter().copied().collect()
    }
}

/// Status checker with per-message retry counts
#[derive(Default)]
pub struct MockStatusChecker {
    retry_counts: Mutex<HashMap<String, u32>>,
    failing: Mutex<bool>,
    calls: Mutex<usize>,
}

impl MockStatusChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_retry_count(&self, message_id: &str, retry_count: u32) {
        self.retry_counts
            .lock()
            .insert(message_id.to_string(), retry_count);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl StatusChecker for MockStatusChecker {
    async fn check_message_status(
        &self,
        message_id: &str,
    ) -> anyhow::Result<(Vec<TransactionStatus>, u32)> {
        *self.calls.lock() += 1;
        if *self.failing.lock() {
            anyhow::bail!("status backend unavailable");
        }
        let retry_count = self.retry_counts.lock().get(message_id).copied().unwrap_or(0);
        Ok((Vec::new(), retry_count))
    }
}

/// `Txm` over `node` with default config and a fresh [`MockKeystore`]
pub fn test_txm(node: Arc<MockFullNode>) -> (Txm, Arc<MockKeystore>) {
    test_txm_with(node, TronTxmConfig::default(), None)
}

pub fn test_txm_with(
    node: Arc<MockFullNode>,
    config: TronTxmConfig,
    checker: Option<Arc<dyn StatusChecker>>,
) -> (Txm, Arc<MockKeystore>) {
    let keystore = Arc::new(MockKeystore::new());
    let mut builder = TxmBuilder::new(config, node, keystore.clone()).name("test-txm");
    if let Some(checker) = checker {
        builder = builder.status_checker(checker);
    }
    match builder.build() {
        Ok(txm) => (txm, keystore),
        Err(e) => panic!("test txm: {e}"),
    }
}

/// Poll until `id` reaches `state` or `timeout` of (virtual) time passes
pub async fn wait_for_state(txm: &Txm, id: &str, state: TxState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if txm.get_state(id) == Some(state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    txm.get_state(id) == Some(state)
}

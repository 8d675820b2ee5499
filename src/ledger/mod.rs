//! Ledger node client
//!
//! The TXM only talks to the ledger through [`FullNodeClient`]. Types here
//! are the decoded view of node responses; the HTTP wire shapes live in
//! [`http`].

pub mod errors;
pub mod http;

pub use errors::LedgerError;
pub use http::{HttpClientConfig, HttpFullNodeClient};

use crate::address::TronAddress;
use crate::tx_builder::SignedTransaction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Broadcast codes that mean "try again shortly"
pub const SERVER_BUSY: &str = "SERVER_BUSY";
pub const BLOCK_UNSOLIDIFIED: &str = "BLOCK_UNSOLIDIFIED";

/// A contract call as sent to the simulation endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub owner_address: TronAddress,
    pub contract_address: TronAddress,
    /// Method signature, e.g. `transfer(address,uint256)`
    pub function_selector: String,
    /// Hex of the ABI-encoded arguments (no selector)
    pub parameter: String,
    #[serde(default)]
    pub call_value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimateEnergyResponse {
    pub energy_required: i64,
}

/// Result of a constant (dry-run) contract call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerConstantResponse {
    pub energy_used: i64,
    pub energy_penalty: i64,
    pub constant_result: Vec<String>,
    /// Set when the dry-run reverted
    pub revert_message: Option<String>,
}

/// The parts of a block header the TXM needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: i64,
    /// 32-byte block id, hex
    pub id: String,
    pub timestamp_ms: i64,
}

/// Node answer to a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastReturn {
    pub result: bool,
    pub code: Option<String>,
    pub message: Option<String>,
    pub txid: Option<String>,
}

impl BroadcastReturn {
    pub fn success(txid: impl Into<String>) -> Self {
        Self {
            result: true,
            code: None,
            message: None,
            txid: Some(txid.into()),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: false,
            code: Some(code.into()),
            message: Some(message.into()),
            txid: None,
        }
    }

    /// Node is overloaded or not yet caught up; the same bytes may be resent
    pub fn is_busy(&self) -> bool {
        matches!(self.code.as_deref(), Some(SERVER_BUSY) | Some(BLOCK_UNSOLIDIFIED))
    }
}

/// Transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionInfo {
    pub id: String,
    pub block_number: i64,
    pub block_timestamp: i64,
    /// Contract execution code (`SUCCESS`, `REVERT`, `OUT_OF_ENERGY`, ...)
    pub receipt_result: Option<String>,
    /// Top-level result, `FAILED` when execution failed
    pub result: Option<String>,
    pub res_message: Option<String>,
}

impl TransactionInfo {
    pub fn is_failed(&self) -> bool {
        self.result.as_deref() == Some("FAILED")
    }
}

/// Which view of the chain a receipt query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainView {
    /// Latest blocks, may still be reorganized
    Tip,
    /// Solidified (irreversible) blocks
    Solid,
}

/// Full node operations used by the transaction manager
#[async_trait]
pub trait FullNodeClient: Send + Sync {
    async fn estimate_energy(
        &self,
        call: &ContractCall,
    ) -> Result<EstimateEnergyResponse, LedgerError>;

    async fn trigger_constant_contract(
        &self,
        call: &ContractCall,
    ) -> Result<TriggerConstantResponse, LedgerError>;

    /// Historical price feed, `"ts:price,ts:price,..."`
    async fn get_energy_prices(&self) -> Result<String, LedgerError>;

    async fn get_now_block(&self) -> Result<BlockHeader, LedgerError>;

    async fn broadcast_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<BroadcastReturn, LedgerError>;

    /// `Ok(None)` when the node has no receipt for `hash` in `view`
    async fn get_transaction_info_by_id(
        &self,
        hash: &str,
        view: ChainView,
    ) -> Result<Option<TransactionInfo>, LedgerError>;
}

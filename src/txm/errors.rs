//! Error types for the transaction manager

use super::tx::TxState;
use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::tx_builder::AbiError;
use thiserror::Error;

/// Errors raised by a per-account transaction store
///
/// Every variant leaves the store untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxStoreError {
    #[error("Transaction {0} already exists")]
    DuplicateId(String),

    #[error("Hash {0} already recorded")]
    DuplicateHash(String),

    #[error("Transaction {0} not found")]
    NotFound(String),

    #[error("Invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TxState,
        to: TxState,
    },

    #[error("Idempotency key {0} already in use")]
    DuplicateIdempotencyKey(String),
}

/// Energy estimation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimateError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Call data encoding failed: {0}")]
    Encoding(#[from] AbiError),

    /// The dry-run reverted; sending the call would fail the same way
    #[error("Dry-run reverted: {message}")]
    Reverted { message: String },
}

/// Errors returned by the public `Txm` surface
#[derive(Error, Debug)]
pub enum TxmError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Keystore cannot sign for {address}: {reason}")]
    UnknownSigner { address: String, reason: String },

    #[error("Duplicate submission for idempotency key {0}")]
    DuplicateSubmission(String),

    #[error("Broadcast queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("Transaction manager is closed")]
    Closed,

    #[error("Transaction manager already started")]
    AlreadyStarted,

    #[error("Status checker failed: {0}")]
    StatusChecker(String),

    #[error(transparent)]
    Store(#[from] TxStoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl TxmError {
    /// Coarse label used in logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            TxmError::Validation(_)
            | TxmError::UnknownSigner { .. }
            | TxmError::DuplicateSubmission(_) => "validation",
            TxmError::QueueFull(_) | TxmError::StatusChecker(_) => "transient",
            TxmError::Closed | TxmError::AlreadyStarted | TxmError::Store(_) => "state",
            TxmError::Config(_) | TxmError::Metrics(_) => "config",
        }
    }
}

impl From<AbiError> for TxmError {
    fn from(err: AbiError) -> Self {
        TxmError::Validation(err.to_string())
    }
}

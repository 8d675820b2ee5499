//! Error types for the transaction builder

use super::abi::AbiError;
use thiserror::Error;

/// Error type for building and serializing transactions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxBuilderError {
    /// Call data could not be encoded
    #[error("ABI encoding failed: {0}")]
    Abi(#[from] AbiError),

    /// Only contract calls are built by this crate
    #[error("Unsupported contract type: {0}")]
    UnsupportedContractType(String),

    /// A transaction must carry exactly one contract
    #[error("Expected exactly one contract, got {0}")]
    ContractCount(usize),

    /// Reference block fields are missing or malformed
    ///
    /// `ref_block_bytes` must be 2 bytes and `ref_block_hash` 8 bytes.
    #[error("Invalid reference block: {0}")]
    InvalidRefBlock(String),

    /// A field of the JSON form could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl TxBuilderError {
    /// Builder failures are deterministic; retrying the same input never helps
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Abi(_) => "abi",
            Self::UnsupportedContractType(_) | Self::ContractCount(_) => "contract",
            Self::InvalidRefBlock(_) => "ref_block",
            Self::Encoding(_) => "encoding",
        }
    }

    pub fn invalid_ref_block(reason: impl Into<String>) -> Self {
        Self::InvalidRefBlock(reason.into())
    }
}

//! TRON relayer transaction manager
//!
//! Submits signed contract calls to a TRON full node and tracks them to
//! finality. The [`txm`] module is the entry point; the other modules are
//! the collaborators it is assembled from.

pub mod address;
pub mod config;
pub mod keystore;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod test_utils;
pub mod tx_builder;
pub mod txm;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use address::TronAddress;
pub use config::TronTxmConfig;
pub use keystore::{Keystore, LocalKeystore};
pub use ledger::{FullNodeClient, HttpClientConfig, HttpFullNodeClient};
pub use txm::{TransactionStatus, TxRequest, Txm, TxmBuilder, TxmError};

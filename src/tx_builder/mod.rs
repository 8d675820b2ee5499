//! TRON transaction builder
//!
//! Turns a contract call (`method` + flat `[type, value, ...]` params) into an
//! unsigned, canonically serialized `Transaction.raw` and its id.
//!
//! ## Layout
//!
//! - **abi**: function selectors and head/tail parameter encoding
//! - **proto**: protobuf messages for the canonical byte encoding
//! - **serializer**: JSON raw-data form, reference block derivation, txid
//! - **errors**: builder error taxonomy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tron_relayer::tx_builder::{abi, BlockRef, ContractCallData, build_transaction};
//! # fn example(owner: tron_relayer::TronAddress, token: tron_relayer::TronAddress)
//! #     -> Result<(), tron_relayer::tx_builder::TxBuilderError> {
//! let params = serde_json::json!(["address", owner.to_base58(), "uint256", "1000"]);
//! let data = abi::encode_call("transfer(address,uint256)", params.as_array().unwrap())?;
//! let block = BlockRef::from_block(
//!     60_941_505,
//!     "0000000003a1e4c1f1d6a3a9f0c9e36b3a1f5b6d7e8f90112233445566778899",
//! )?;
//! let call = ContractCallData {
//!     owner_address: owner,
//!     contract_address: token,
//!     call_value: 0,
//!     data,
//! };
//! let unsigned = build_transaction(&call, &block, 15_000_000, 1_700_000_000_000, None)?;
//! println!("txid {}", unsigned.tx_id_hex());
//! # Ok(())
//! # }
//! ```

pub mod abi;
pub mod errors;
pub mod proto;
pub mod serializer;

pub use abi::AbiError;
pub use errors::TxBuilderError;
pub use serializer::{
    build_raw_data, build_transaction, serialize, BlockRef, ContractCallData, RawDataJson,
    SerializedTx, SignedTransaction, DEFAULT_EXPIRATION_MS,
};

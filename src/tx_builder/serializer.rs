//! Raw transaction construction and canonical serialization
//!
//! `build_raw_data` produces the human-readable (JSON) form of an unsigned
//! contract call; `serialize` turns that form into canonical protobuf bytes
//! and the transaction id (`sha256` of those bytes). Both are pure.

use super::errors::TxBuilderError;
use super::proto;
use crate::address::TronAddress;
use prost::Message;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Expiration window used when the caller does not supply one
pub const DEFAULT_EXPIRATION_MS: i64 = 30_000;

/// Reference block (TaPoS) fields scoping a transaction to a recent block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub ref_block_bytes: [u8; 2],
    pub ref_block_hash: [u8; 8],
}

impl BlockRef {
    /// Derive from a block number and its 32-byte block id (hex)
    pub fn from_block(number: i64, block_id_hex: &str) -> Result<Self, TxBuilderError> {
        if number < 0 {
            return Err(TxBuilderError::invalid_ref_block(format!(
                "negative block number {number}"
            )));
        }
        let id = hex::decode(block_id_hex)
            .map_err(|e| TxBuilderError::invalid_ref_block(format!("block id: {e}")))?;
        if id.len() != 32 {
            return Err(TxBuilderError::invalid_ref_block(format!(
                "block id must be 32 bytes, got {}",
                id.len()
            )));
        }
        let number_bytes = (number as u64).to_be_bytes();
        let mut ref_block_bytes = [0u8; 2];
        ref_block_bytes.copy_from_slice(&number_bytes[6..8]);
        let mut ref_block_hash = [0u8; 8];
        ref_block_hash.copy_from_slice(&id[8..16]);
        Ok(Self {
            ref_block_bytes,
            ref_block_hash,
        })
    }
}

/// The contract call being packed into a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCallData {
    pub owner_address: TronAddress,
    pub contract_address: TronAddress,
    pub call_value: i64,
    pub data: Vec<u8>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSmartContractJson {
    pub data: String,
    pub owner_address: TronAddress,
    pub contract_address: TronAddress,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub call_value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterJson {
    pub value: TriggerSmartContractJson,
    pub type_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractJson {
    pub parameter: ParameterJson,
    #[serde(rename = "type")]
    pub contract_type: String,
}

/// Human-readable mirror of `Transaction.raw`, as accepted by the node's JSON API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDataJson {
    pub contract: Vec<ContractJson>,
    pub ref_block_bytes: String,
    pub ref_block_hash: String,
    pub expiration: i64,
    pub fee_limit: i64,
    pub timestamp: i64,
}

/// Unsigned transaction ready for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedTx {
    pub raw_data: RawDataJson,
    pub raw_bytes: Vec<u8>,
    pub tx_id: [u8; 32],
}

impl SerializedTx {
    pub fn tx_id_hex(&self) -> String {
        hex::encode(self.tx_id)
    }

    /// Attach a signature, producing the broadcastable form
    pub fn into_signed(self, signature: Vec<u8>) -> SignedTransaction {
        SignedTransaction {
            tx_id: hex::encode(self.tx_id),
            raw_data_hex: hex::encode(&self.raw_bytes),
            raw_data: self.raw_data,
            signature: vec![hex::encode(signature)],
            visible: true,
        }
    }
}

/// Signed transaction in the node's JSON broadcast format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub raw_data: RawDataJson,
    pub raw_data_hex: String,
    pub signature: Vec<String>,
    pub visible: bool,
}

/// Build the JSON form of an unsigned contract call
///
/// `expiration_ms` defaults to `timestamp_ms + DEFAULT_EXPIRATION_MS`.
pub fn build_raw_data(
    call: &ContractCallData,
    block: &BlockRef,
    fee_limit: i64,
    timestamp_ms: i64,
    expiration_ms: Option<i64>,
) -> RawDataJson {
    RawDataJson {
        contract: vec![ContractJson {
            parameter: ParameterJson {
                value: TriggerSmartContractJson {
                    data: hex::encode(&call.data),
                    owner_address: call.owner_address,
                    contract_address: call.contract_address,
                    call_value: call.call_value,
                },
                type_url: proto::TRIGGER_SMART_CONTRACT_TYPE_URL.to_string(),
            },
            contract_type: proto::ContractType::TriggerSmartContract
                .as_str_name()
                .to_string(),
        }],
        ref_block_bytes: hex::encode(block.ref_block_bytes),
        ref_block_hash: hex::encode(block.ref_block_hash),
        expiration: expiration_ms.unwrap_or(timestamp_ms.saturating_add(DEFAULT_EXPIRATION_MS)),
        fee_limit,
        timestamp: timestamp_ms,
    }
}

/// Canonical protobuf encoding and transaction id of a raw transaction
pub fn serialize(raw: &RawDataJson) -> Result<SerializedTx, TxBuilderError> {
    if raw.contract.len() != 1 {
        return Err(TxBuilderError::ContractCount(raw.contract.len()));
    }
    let contract = &raw.contract[0];
    if proto::ContractType::from_str_name(&contract.contract_type)
        != Some(proto::ContractType::TriggerSmartContract)
    {
        return Err(TxBuilderError::UnsupportedContractType(
            contract.contract_type.clone(),
        ));
    }
    if contract.parameter.type_url != proto::TRIGGER_SMART_CONTRACT_TYPE_URL {
        return Err(TxBuilderError::UnsupportedContractType(
            contract.parameter.type_url.clone(),
        ));
    }

    let ref_block_bytes = decode_fixed(&raw.ref_block_bytes, 2, "ref_block_bytes")?;
    let ref_block_hash = decode_fixed(&raw.ref_block_hash, 8, "ref_block_hash")?;
    if raw.fee_limit < 0 {
        return Err(TxBuilderError::Encoding(format!(
            "negative fee_limit {}",
            raw.fee_limit
        )));
    }

    let call = &contract.parameter.value;
    let data = hex::decode(&call.data)
        .map_err(|e| TxBuilderError::Encoding(format!("call data: {e}")))?;
    let trigger = proto::TriggerSmartContract {
        owner_address: call.owner_address.as_bytes().to_vec(),
        contract_address: call.contract_address.as_bytes().to_vec(),
        call_value: call.call_value,
        data,
        ..Default::default()
    };

    let raw_proto = proto::TransactionRaw {
        ref_block_bytes,
        ref_block_hash,
        expiration: raw.expiration,
        contract: vec![proto::Contract {
            r#type: proto::ContractType::TriggerSmartContract as i32,
            parameter: Some(proto::Any {
                type_url: proto::TRIGGER_SMART_CONTRACT_TYPE_URL.to_string(),
                value: trigger.encode_to_vec(),
            }),
        }],
        timestamp: raw.timestamp,
        fee_limit: raw.fee_limit,
        ..Default::default()
    };

    let raw_bytes = raw_proto.encode_to_vec();
    let tx_id: [u8; 32] = Sha256::digest(&raw_bytes).into();

    Ok(SerializedTx {
        raw_data: raw.clone(),
        raw_bytes,
        tx_id,
    })
}

/// `build_raw_data` followed by `serialize`
pub fn build_transaction(
    call: &ContractCallData,
    block: &BlockRef,
    fee_limit: i64,
    timestamp_ms: i64,
    expiration_ms: Option<i64>,
) -> Result<SerializedTx, TxBuilderError> {
    serialize(&build_raw_data(call, block, fee_limit, timestamp_ms, expiration_ms))
}

fn decode_fixed(hex_str: &str, len: usize, field: &str) -> Result<Vec<u8>, TxBuilderError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| TxBuilderError::invalid_ref_block(format!("{field}: {e}")))?;
    if bytes.len() != len {
        return Err(TxBuilderError::invalid_ref_block(format!(
            "{field} must be {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

//! Protobuf messages for the canonical raw transaction encoding
//!
//! Only the subset of `protocol.Transaction` needed for contract calls is
//! modelled. Field tags follow the ledger's `Tron.proto`; unknown fields are
//! never emitted, so the encoding of a given `TransactionRaw` is canonical.

/// `google.protobuf.Any`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ContractType {
    AccountCreateContract = 0,
    TransferContract = 1,
    TransferAssetContract = 2,
    CreateSmartContract = 30,
    TriggerSmartContract = 31,
}

impl ContractType {
    /// Name used in the JSON form of a transaction
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ContractType::AccountCreateContract => "AccountCreateContract",
            ContractType::TransferContract => "TransferContract",
            ContractType::TransferAssetContract => "TransferAssetContract",
            ContractType::CreateSmartContract => "CreateSmartContract",
            ContractType::TriggerSmartContract => "TriggerSmartContract",
        }
    }

    pub fn from_str_name(name: &str) -> Option<Self> {
        match name {
            "AccountCreateContract" => Some(ContractType::AccountCreateContract),
            "TransferContract" => Some(ContractType::TransferContract),
            "TransferAssetContract" => Some(ContractType::TransferAssetContract),
            "CreateSmartContract" => Some(ContractType::CreateSmartContract),
            "TriggerSmartContract" => Some(ContractType::TriggerSmartContract),
            _ => None,
        }
    }
}

/// `protocol.TriggerSmartContract`
#[derive(Clone, PartialEq, prost::Message)]
pub struct TriggerSmartContract {
    #[prost(bytes = "vec", tag = "1")]
    pub owner_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub contract_address: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub call_value: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
    #[prost(int64, tag = "5")]
    pub call_token_value: i64,
    #[prost(int64, tag = "6")]
    pub token_id: i64,
}

/// `protocol.Transaction.Contract`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Contract {
    #[prost(enumeration = "ContractType", tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub parameter: Option<Any>,
}

/// `protocol.Transaction.raw`
#[derive(Clone, PartialEq, prost::Message)]
pub struct TransactionRaw {
    #[prost(bytes = "vec", tag = "1")]
    pub ref_block_bytes: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub ref_block_num: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub ref_block_hash: Vec<u8>,
    #[prost(int64, tag = "8")]
    pub expiration: i64,
    #[prost(bytes = "vec", tag = "10")]
    pub data: Vec<u8>,
    #[prost(message, repeated, tag = "11")]
    pub contract: Vec<Contract>,
    #[prost(int64, tag = "14")]
    pub timestamp: i64,
    #[prost(int64, tag = "18")]
    pub fee_limit: i64,
}

/// `protocol.Transaction`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Transaction {
    #[prost(message, optional, tag = "1")]
    pub raw_data: Option<TransactionRaw>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub signature: Vec<Vec<u8>>,
}

pub const TRIGGER_SMART_CONTRACT_TYPE_URL: &str =
    "type.googleapis.com/protocol.TriggerSmartContract";

//! TRON account addresses
//!
//! A TRON address is 21 bytes: the `0x41` network prefix followed by the
//! 20-byte account hash. The canonical text form is base58check (`T...`),
//! nodes also accept the hex form (`41...`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Network prefix byte for mainnet/testnet addresses
pub const ADDRESS_PREFIX: u8 = 0x41;

/// Length of a raw address including the prefix
pub const ADDRESS_LEN: usize = 21;

/// Address parsing errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid base58check address: {0}")]
    Base58(String),

    #[error("Invalid hex address: {0}")]
    Hex(String),

    #[error("Invalid address length: expected {ADDRESS_LEN} bytes, got {0}")]
    Length(usize),

    #[error("Invalid address prefix: 0x{0:02x}")]
    Prefix(u8),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TronAddress([u8; ADDRESS_LEN]);

impl TronAddress {
    /// Build from raw bytes, validating length and prefix
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != ADDRESS_LEN {
            return Err(AddressError::Length(bytes.len()));
        }
        if bytes[0] != ADDRESS_PREFIX {
            return Err(AddressError::Prefix(bytes[0]));
        }
        let mut raw = [0u8; ADDRESS_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Build from the 20-byte account hash (EVM-style address)
    pub fn from_evm_bytes(hash: &[u8; 20]) -> Self {
        let mut raw = [0u8; ADDRESS_LEN];
        raw[0] = ADDRESS_PREFIX;
        raw[1..].copy_from_slice(hash);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// The 20-byte account hash without the network prefix
    pub fn evm_bytes(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).with_check().into_string()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn from_base58(s: &str) -> Result<Self, AddressError> {
        let bytes = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| AddressError::Base58(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    fn from_hex(s: &str) -> Result<Self, AddressError> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| AddressError::Hex(e.to_string()))?;
        match bytes.len() {
            // 20-byte EVM form, add the network prefix
            20 => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&bytes);
                Ok(Self::from_evm_bytes(&hash))
            }
            _ => Self::from_bytes(&bytes),
        }
    }
}

impl FromStr for TronAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('T') {
            Self::from_base58(s)
        } else {
            Self::from_hex(s)
        }
    }
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TronAddress({})", self.to_base58())
    }
}

impl Serialize for TronAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for TronAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

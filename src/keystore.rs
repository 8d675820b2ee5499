//! Signer abstraction for transaction signing
//!
//! The TXM only needs two things from a keystore: "do you hold the key for
//! this address?" (a `sign` call with no digest) and a recoverable secp256k1
//! signature over a transaction id.

use crate::address::TronAddress;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use thiserror::Error;

/// Keystore errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeystoreError {
    #[error("No key for address {0}")]
    UnknownAddress(TronAddress),

    #[error("Invalid digest: expected 32 bytes, got {0}")]
    InvalidDigest(usize),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

/// Async signer interface consumed by the transaction manager
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Sign `digest` with the key of `address`.
    ///
    /// With `digest == None` this is a capability probe: it succeeds (with an
    /// empty signature) iff the keystore holds a key for `address`.
    async fn sign(
        &self,
        address: &TronAddress,
        digest: Option<&[u8]>,
    ) -> Result<Vec<u8>, KeystoreError>;

    /// Addresses this keystore can sign for
    async fn accounts(&self) -> Vec<TronAddress>;
}

/// In-process secp256k1 keystore
pub struct LocalKeystore {
    keys: HashMap<TronAddress, SigningKey>,
}

impl LocalKeystore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Build from hex-encoded private keys (with or without `0x`)
    pub fn from_hex_keys<I, S>(keys: I) -> Result<Self, KeystoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keystore = Self::new();
        for key in keys {
            let key = key.as_ref().trim();
            if key.is_empty() {
                continue;
            }
            let bytes = hex::decode(key.strip_prefix("0x").unwrap_or(key))
                .map_err(|e| KeystoreError::InvalidKey(e.to_string()))?;
            keystore.add_key(&bytes)?;
        }
        Ok(keystore)
    }

    /// Add a raw 32-byte private key, returning its address
    pub fn add_key(&mut self, secret: &[u8]) -> Result<TronAddress, KeystoreError> {
        if secret.len() != 32 {
            return Err(KeystoreError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                secret.len()
            )));
        }
        let key =
            SigningKey::from_slice(secret).map_err(|e| KeystoreError::InvalidKey(e.to_string()))?;
        let address = address_of(&key);
        self.keys.insert(address, key);
        Ok(address)
    }
}

impl Default for LocalKeystore {
    fn default() -> Self {
        Self::new()
    }
}

/// TRON address of a secp256k1 key: `0x41 ++ keccak256(pubkey[1..])[12..]`
pub fn address_of(key: &SigningKey) -> TronAddress {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut evm = [0u8; 20];
    evm.copy_from_slice(&hash[12..]);
    TronAddress::from_evm_bytes(&evm)
}

#[async_trait]
impl Keystore for LocalKeystore {
    async fn sign(
        &self,
        address: &TronAddress,
        digest: Option<&[u8]>,
    ) -> Result<Vec<u8>, KeystoreError> {
        let key = self
            .keys
            .get(address)
            .ok_or(KeystoreError::UnknownAddress(*address))?;

        let Some(digest) = digest else {
            return Ok(Vec::new());
        };
        if digest.len() != 32 {
            return Err(KeystoreError::InvalidDigest(digest.len()));
        }

        let (signature, recovery_id) = key
            .sign_prehash_recoverable(digest)
            .map_err(|e| KeystoreError::Signing(e.to_string()))?;

        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(recovery_id.to_byte());
        Ok(out)
    }

    async fn accounts(&self) -> Vec<TronAddress> {
        self.keys.keys().copied().collect()
    }
}

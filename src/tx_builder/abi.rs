//! Contract call-data encoding
//!
//! Call parameters arrive as the flat JSON list the TXM accepts:
//! `[type, value, type, value, ...]`, e.g.
//! `["address", "T...", "uint256", "1000", "bytes32[]", ["0x..", "0x.."]]`.
//! The encoding is the standard contract ABI head/tail layout behind a
//! 4-byte `keccak256(method)` selector.

use crate::address::TronAddress;
use serde_json::Value;
use sha3::{Digest, Keccak256};
use thiserror::Error;

const WORD: usize = 32;

/// ABI encoding errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("Parameter list must alternate type and value, got {0} entries")]
    OddParamCount(usize),

    #[error("Parameter type at position {0} must be a string")]
    NonStringType(usize),

    #[error("Unsupported ABI type: {0}")]
    UnsupportedType(String),

    #[error("Invalid value for {ty}: {reason}")]
    InvalidValue { ty: String, reason: String },
}

impl AbiError {
    fn invalid(ty: &AbiType, reason: impl Into<String>) -> Self {
        AbiError::InvalidValue {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Address,
    Bool,
    Uint(usize),
    Int(usize),
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
}

impl std::fmt::Display for AbiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbiType::Address => write!(f, "address"),
            AbiType::Bool => write!(f, "bool"),
            AbiType::Uint(bits) => write!(f, "uint{}", bits),
            AbiType::Int(bits) => write!(f, "int{}", bits),
            AbiType::FixedBytes(n) => write!(f, "bytes{}", n),
            AbiType::Bytes => write!(f, "bytes"),
            AbiType::String => write!(f, "string"),
            AbiType::Array(inner) => write!(f, "{}[]", inner),
            AbiType::FixedArray(inner, n) => write!(f, "{}[{}]", inner, n),
        }
    }
}

impl std::str::FromStr for AbiType {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unsupported = || AbiError::UnsupportedType(s.to_string());

        if let Some(stripped) = s.strip_suffix(']') {
            let open = stripped.rfind('[').ok_or_else(unsupported)?;
            let inner: AbiType = stripped[..open].parse()?;
            let size = &stripped[open + 1..];
            return if size.is_empty() {
                Ok(AbiType::Array(Box::new(inner)))
            } else {
                let n: usize = size.parse().map_err(|_| unsupported())?;
                Ok(AbiType::FixedArray(Box::new(inner), n))
            };
        }

        match s {
            "address" => return Ok(AbiType::Address),
            "bool" => return Ok(AbiType::Bool),
            "bytes" => return Ok(AbiType::Bytes),
            "string" => return Ok(AbiType::String),
            "uint" => return Ok(AbiType::Uint(256)),
            "int" => return Ok(AbiType::Int(256)),
            _ => {}
        }

        let sized = |prefix: &str| -> Option<usize> { s.strip_prefix(prefix)?.parse().ok() };
        if let Some(bits) = sized("uint") {
            if bits % 8 == 0 && (8..=256).contains(&bits) {
                return Ok(AbiType::Uint(bits));
            }
        } else if let Some(bits) = sized("int") {
            if bits % 8 == 0 && (8..=256).contains(&bits) {
                return Ok(AbiType::Int(bits));
            }
        } else if let Some(n) = sized("bytes") {
            if (1..=32).contains(&n) {
                return Ok(AbiType::FixedBytes(n));
            }
        }
        Err(unsupported())
    }
}

impl AbiType {
    fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String | AbiType::Array(_) => true,
            AbiType::FixedArray(inner, _) => inner.is_dynamic(),
            _ => false,
        }
    }

    /// Size of this type's slot in the head of an enclosing tuple
    fn head_size(&self) -> usize {
        match self {
            _ if self.is_dynamic() => WORD,
            AbiType::FixedArray(inner, n) => inner.head_size() * n,
            _ => WORD,
        }
    }
}

/// `keccak256(method)[..4]`, ignoring whitespace in the signature
pub fn function_selector(method: &str) -> [u8; 4] {
    let normalized: String = method.chars().filter(|c| !c.is_whitespace()).collect();
    let hash = Keccak256::digest(normalized.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

/// Check that `params` is a `[type, value, ...]` list with string type tags
pub fn validate_param_shape(params: &[Value]) -> Result<(), AbiError> {
    if params.len() % 2 != 0 {
        return Err(AbiError::OddParamCount(params.len()));
    }
    for (i, tag) in params.iter().step_by(2).enumerate() {
        if !tag.is_string() {
            return Err(AbiError::NonStringType(i * 2));
        }
    }
    Ok(())
}

/// Encode the parameter list without a selector
pub fn encode_params(params: &[Value]) -> Result<Vec<u8>, AbiError> {
    validate_param_shape(params)?;
    let mut items = Vec::with_capacity(params.len() / 2);
    for pair in params.chunks(2) {
        // shape already validated
        let ty: AbiType = pair[0].as_str().unwrap_or_default().parse()?;
        items.push((ty, &pair[1]));
    }
    encode_tuple(&items)
}

/// Selector followed by the encoded parameters
pub fn encode_call(method: &str, params: &[Value]) -> Result<Vec<u8>, AbiError> {
    let mut data = function_selector(method).to_vec();
    data.extend(encode_params(params)?);
    Ok(data)
}

fn encode_tuple(items: &[(AbiType, &Value)]) -> Result<Vec<u8>, AbiError> {
    let head_len: usize = items.iter().map(|(ty, _)| ty.head_size()).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for (ty, value) in items {
        let encoded = encode_value(ty, value)?;
        if ty.is_dynamic() {
            head.extend_from_slice(&usize_word(head_len + tail.len()));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }
    head.extend(tail);
    Ok(head)
}

fn encode_value(ty: &AbiType, value: &Value) -> Result<Vec<u8>, AbiError> {
    match ty {
        AbiType::Address => {
            let s = value
                .as_str()
                .ok_or_else(|| AbiError::invalid(ty, "expected string"))?;
            let address: TronAddress = s.parse().map_err(|e| AbiError::invalid(ty, format!("{e}")))?;
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(address.evm_bytes());
            Ok(word.to_vec())
        }
        AbiType::Bool => {
            let b = match value {
                Value::Bool(b) => *b,
                Value::String(s) if s == "true" => true,
                Value::String(s) if s == "false" => false,
                _ => return Err(AbiError::invalid(ty, "expected boolean")),
            };
            Ok(usize_word(b as usize).to_vec())
        }
        AbiType::Uint(bits) => {
            let word = parse_unsigned(ty, value)?;
            let free_bytes = (256 - bits) / 8;
            if word[..free_bytes].iter().any(|b| *b != 0) {
                return Err(AbiError::invalid(ty, "value out of range"));
            }
            Ok(word.to_vec())
        }
        AbiType::Int(bits) => {
            let n = parse_signed(ty, value)?;
            if *bits < 128 {
                let limit = 1i128 << (bits - 1);
                if n < -limit || n >= limit {
                    return Err(AbiError::invalid(ty, "value out of range"));
                }
            }
            let fill = if n < 0 { 0xff } else { 0x00 };
            let mut word = [fill; WORD];
            word[16..].copy_from_slice(&n.to_be_bytes());
            Ok(word.to_vec())
        }
        AbiType::FixedBytes(n) => {
            let bytes = parse_hex(ty, value)?;
            if bytes.len() != *n {
                return Err(AbiError::invalid(
                    ty,
                    format!("expected {} bytes, got {}", n, bytes.len()),
                ));
            }
            let mut word = [0u8; WORD];
            word[..*n].copy_from_slice(&bytes);
            Ok(word.to_vec())
        }
        AbiType::Bytes => Ok(encode_dynamic_bytes(&parse_hex(ty, value)?)),
        AbiType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| AbiError::invalid(ty, "expected string"))?;
            Ok(encode_dynamic_bytes(s.as_bytes()))
        }
        AbiType::Array(inner) => {
            let elements = value
                .as_array()
                .ok_or_else(|| AbiError::invalid(ty, "expected array"))?;
            let items: Vec<_> = elements.iter().map(|v| ((**inner).clone(), v)).collect();
            let mut out = usize_word(elements.len()).to_vec();
            out.extend(encode_tuple(&items)?);
            Ok(out)
        }
        AbiType::FixedArray(inner, n) => {
            let elements = value
                .as_array()
                .ok_or_else(|| AbiError::invalid(ty, "expected array"))?;
            if elements.len() != *n {
                return Err(AbiError::invalid(
                    ty,
                    format!("expected {} elements, got {}", n, elements.len()),
                ));
            }
            let items: Vec<_> = elements.iter().map(|v| ((**inner).clone(), v)).collect();
            encode_tuple(&items)
        }
    }
}

fn usize_word(n: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(n as u64).to_be_bytes());
    word
}

fn encode_dynamic_bytes(bytes: &[u8]) -> Vec<u8> {
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = usize_word(bytes.len()).to_vec();
    out.extend_from_slice(bytes);
    out.resize(WORD + padded, 0);
    out
}

fn parse_hex(ty: &AbiType, value: &Value) -> Result<Vec<u8>, AbiError> {
    let s = value
        .as_str()
        .ok_or_else(|| AbiError::invalid(ty, "expected hex string"))?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| AbiError::invalid(ty, e.to_string()))
}

/// Parse a JSON number, decimal string or `0x` hex string into a 256-bit word
fn parse_unsigned(ty: &AbiType, value: &Value) -> Result<[u8; WORD], AbiError> {
    let mut word = [0u8; WORD];
    match value {
        Value::Number(n) => {
            let v = n
                .as_u64()
                .ok_or_else(|| AbiError::invalid(ty, "expected unsigned integer"))?;
            word[WORD - 8..].copy_from_slice(&v.to_be_bytes());
        }
        Value::String(s) => {
            if let Some(hex_digits) = s.strip_prefix("0x") {
                let padded = if hex_digits.len() % 2 == 1 {
                    format!("0{hex_digits}")
                } else {
                    hex_digits.to_string()
                };
                let bytes = hex::decode(padded).map_err(|e| AbiError::invalid(ty, e.to_string()))?;
                if bytes.len() > WORD {
                    return Err(AbiError::invalid(ty, "value out of range"));
                }
                word[WORD - bytes.len()..].copy_from_slice(&bytes);
            } else {
                if s.is_empty() {
                    return Err(AbiError::invalid(ty, "empty number"));
                }
                for c in s.chars() {
                    let digit = c
                        .to_digit(10)
                        .ok_or_else(|| AbiError::invalid(ty, format!("invalid digit {c:?}")))?;
                    // word = word * 10 + digit
                    let mut carry = digit as u16;
                    for byte in word.iter_mut().rev() {
                        let v = (*byte as u16) * 10 + carry;
                        *byte = (v & 0xff) as u8;
                        carry = v >> 8;
                    }
                    if carry != 0 {
                        return Err(AbiError::invalid(ty, "value out of range"));
                    }
                }
            }
        }
        _ => return Err(AbiError::invalid(ty, "expected number or string")),
    }
    Ok(word)
}

fn parse_signed(ty: &AbiType, value: &Value) -> Result<i128, AbiError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .ok_or_else(|| AbiError::invalid(ty, "expected integer")),
        Value::String(s) => s
            .parse::<i128>()
            .map_err(|e| AbiError::invalid(ty, e.to_string())),
        _ => Err(AbiError::invalid(ty, "expected number or string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn words(data: &[u8]) -> Vec<String> {
        data.chunks(WORD).map(hex::encode).collect()
    }

    #[test]
    fn test_selector() {
        assert_eq!(hex::encode(function_selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(function_selector("transfer(address, uint256)")), "a9059cbb");
    }

    #[test]
    fn test_parse_types() {
        assert_eq!("uint".parse::<AbiType>().unwrap(), AbiType::Uint(256));
        assert_eq!(
            "bytes32[3]".parse::<AbiType>().unwrap(),
            AbiType::FixedArray(Box::new(AbiType::FixedBytes(32)), 3)
        );
        assert_eq!(
            "uint8[][]".parse::<AbiType>().unwrap(),
            AbiType::Array(Box::new(AbiType::Array(Box::new(AbiType::Uint(8)))))
        );
        assert!("uint7".parse::<AbiType>().is_err());
        assert!("bytes33".parse::<AbiType>().is_err());
        assert!("tuple".parse::<AbiType>().is_err());
    }

    #[test]
    fn test_shape_validation() {
        assert_eq!(
            validate_param_shape(&[json!("uint256")]),
            Err(AbiError::OddParamCount(1))
        );
        assert_eq!(
            validate_param_shape(&[json!(1), json!(2)]),
            Err(AbiError::NonStringType(0))
        );
        assert!(validate_param_shape(&[]).is_ok());
    }

    #[test]
    fn test_transfer_call() {
        let data = encode_call(
            "transfer(address,uint256)",
            &[
                json!("address"),
                json!("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"),
                json!("uint256"),
                json!("1000000"),
            ],
        )
        .unwrap();
        assert_eq!(hex::encode(&data[..4]), "a9059cbb");
        let w = words(&data[4..]);
        assert_eq!(w[0], format!("{}{}", "0".repeat(24), "a614f803b6fd780986a42c78ec9c7f77e6ded13c"));
        assert_eq!(w[1], format!("{}{}", "0".repeat(59), "f4240"));
    }

    #[test]
    fn test_dynamic_layout() {
        // f(bytes, uint8[])
        let data = encode_params(&[
            json!("bytes"),
            json!("0xdeadbeef"),
            json!("uint8[]"),
            json!([1, 2]),
        ])
        .unwrap();
        let w = words(&data);
        assert_eq!(w.len(), 7);
        assert!(w[0].ends_with("40")); // offset of bytes
        assert!(w[1].ends_with("80")); // offset of array
        assert!(w[2].ends_with("04")); // bytes length
        assert!(w[3].starts_with("deadbeef"));
        assert!(w[4].ends_with("02")); // array length
        assert!(w[5].ends_with("01"));
        assert!(w[6].ends_with("02"));
    }

    #[test]
    fn test_fixed_array_is_inline() {
        let data = encode_params(&[
            json!("bytes32[2]"),
            json!([format!("0x{}", "11".repeat(32)), format!("0x{}", "22".repeat(32))]),
        ])
        .unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(data[0], 0x11);
        assert_eq!(data[32], 0x22);
    }

    #[test]
    fn test_integer_ranges() {
        let neg = encode_params(&[json!("int8"), json!(-1)]).unwrap();
        assert!(neg.iter().all(|b| *b == 0xff));
        assert!(encode_params(&[json!("int8"), json!(128)]).is_err());
        assert!(encode_params(&[json!("uint8"), json!(256)]).is_err());

        let max = format!("0x{}", "ff".repeat(32));
        assert!(encode_params(&[json!("uint256"), json!(max)]).is_ok());
        // 2^256 does not fit
        let too_big = "115792089237316195423570985008687907853269984665640564039457584007913129639936";
        assert!(encode_params(&[json!("uint256"), json!(too_big)]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert!(encode_params(&[json!("bytes4"), json!("0x0102")]).is_err());
        assert!(encode_params(&[json!("bool"), json!(1)]).is_err());
        assert!(encode_params(&[json!("address"), json!("not-an-address")]).is_err());
        assert!(encode_params(&[json!("uint256[2]"), json!([1])]).is_err());
    }
}

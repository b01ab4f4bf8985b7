//! # Shared Identifier Types
//!
//! Addresses identify both depositors and adapters. They are 20-byte opaque
//! identifiers rendered as `0x`-prefixed lowercase hex. The all-zero address
//! is reserved as the null id and is never accepted as an adapter id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of an [`Address`] in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Errors produced while parsing an [`Address`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    /// The string was not valid hex.
    #[error("invalid hex in address: {0}")]
    InvalidHex(String),

    /// The decoded byte length was wrong.
    #[error("address must be {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Decoded length.
        actual: usize,
    },
}

/// A 20-byte account or adapter identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The null address.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Wraps raw bytes.
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derives a stable address from a human-readable label.
    ///
    /// The first 20 bytes of `BLAKE3("aion:address:" || label)`. Used for
    /// simulated backends and test fixtures so ids survive restarts.
    pub fn derive(label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"aion:address:");
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest.as_bytes()[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    /// The address controlled by an Ed25519 public key: the first 20 bytes of
    /// `BLAKE3("aion:key:" || public_key)`. The prefix keeps key-derived
    /// addresses disjoint from [`Address::derive`] labels.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"aion:key:");
        hasher.update(public_key);
        let digest = hasher.finalize();
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest.as_bytes()[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    /// Returns `true` for the null address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| AddressParseError::InvalidHex(e.to_string()))?;
        let actual = bytes.len();
        let array: [u8; ADDRESS_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| AddressParseError::InvalidLength {
                    expected: ADDRESS_LENGTH,
                    actual,
                })?;
        Ok(Self(array))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The asset an adapter accepts.
///
/// `Native` stands in for the chain's native coin, which is attached to the
/// call rather than transferred through a token ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum AssetId {
    /// Native asset, attached as call value.
    Native,
    /// A token identified by its contract address.
    Token(Address),
}

impl AssetId {
    /// Returns `true` for the native asset.
    pub fn is_native(&self) -> bool {
        matches!(self, AssetId::Native)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => write!(f, "native"),
            AssetId::Token(addr) => write!(f, "token:{}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_through_display_and_parse() {
        let addr = Address::derive("alice");
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn parse_accepts_missing_prefix() {
        let addr = Address::derive("bob");
        let raw = hex::encode(addr.as_bytes());
        assert_eq!(raw.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = "0xdeadbeef".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            AddressParseError::InvalidLength {
                expected: 20,
                actual: 4
            }
        );
    }

    #[test]
    fn derive_is_deterministic_and_label_sensitive() {
        assert_eq!(Address::derive("pool"), Address::derive("pool"));
        assert_ne!(Address::derive("pool"), Address::derive("pool2"));
        assert!(!Address::derive("pool").is_zero());
        assert!(Address::ZERO.is_zero());
    }

    #[test]
    fn key_addresses_do_not_collide_with_labels() {
        let key = [7u8; 32];
        assert_eq!(Address::from_public_key(&key), Address::from_public_key(&key));
        assert_ne!(Address::from_public_key(&key), Address::from_public_key(&[8u8; 32]));
        let as_label = String::from_utf8_lossy(&key).into_owned();
        assert_ne!(Address::from_public_key(&key), Address::derive(&as_label));
    }

    #[test]
    fn serde_uses_hex_string() {
        let addr = Address::derive("carol");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}

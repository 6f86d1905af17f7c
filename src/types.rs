use std::fmt;
use std::str::FromStr;

use ethnum::{I256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Token and native-currency amounts, in base units (wei-like).
pub type Amount = u128;

/// Fixed-point scale of the dividend-per-share accumulator.
///
/// A power of ten, so decimal-sized distributions over decimal-sized supplies
/// divide exactly. The accumulator and the per-holder corrections are 256-bit,
/// so `per_share * balance` only overflows once
/// `distributed * balance_change / supply` exceeds ~5.7e64. Past that
/// operations fail with `Overflow`; nothing wraps.
pub const MAGNITUDE: u128 = 1_000_000_000_000;

/// Decimals of the native currency (1 ether = 10^18 wei).
pub const NATIVE_DECIMALS: u8 = 18;

/// 20-byte account identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The null/burn address. Never a valid transfer recipient.
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Deterministically derive an address from a label, e.g. for test accounts
    /// or for the dividend tracker identity.
    pub fn derive(domain: &[u8], seed: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(seed);
        let digest: [u8; 32] = hasher.finalize().into();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("expected 20 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(body).map_err(|e| AddressParseError::Hex(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(AddressParseError::Length(bytes.len()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// `10^decimals` as an `Amount`, `None` if it does not fit.
pub fn pow10(decimals: u8) -> Option<Amount> {
    10u128.checked_pow(decimals as u32)
}

/// Serde adapters writing 256-bit integers as decimal strings.
pub mod wide {
    use super::*;

    pub mod unsigned {
        use super::*;

        pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(value)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
            let raw = String::deserialize(deserializer)?;
            U256::from_str_radix(&raw, 10).map_err(serde::de::Error::custom)
        }
    }

    pub mod signed {
        use super::*;

        pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(value)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
            let raw = String::deserialize(deserializer)?;
            I256::from_str_radix(&raw, 10).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_round_trip() {
        let addr = Address::derive(b"test", b"alice");
        let text = addr.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 42);
        assert_eq!(text.parse::<Address>().unwrap(), addr);
        assert_eq!(
            "0xdeadbeef".parse::<Address>(),
            Err(AddressParseError::Length(4))
        );
    }

    #[test]
    fn derive_is_domain_separated() {
        assert_ne!(
            Address::derive(b"a", b"seed"),
            Address::derive(b"b", b"seed")
        );
        assert!(!Address::derive(b"a", b"seed").is_zero());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wide {
        #[serde(with = "wide::unsigned")]
        per_share: U256,
        #[serde(with = "wide::signed")]
        correction: I256,
    }

    #[test]
    fn wide_values_serialize_as_decimal_strings() {
        let value = Wide {
            per_share: U256::from(u128::MAX) * U256::from(1_000u128),
            correction: I256::from(-5i128),
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(
            json,
            r#"{"per_share":"340282366920938463463374607431768211455000","correction":"-5"}"#
        );
        assert_eq!(serde_json::from_str::<Wide>(&json).unwrap(), value);
    }
}

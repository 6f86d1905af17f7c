use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dividends::DustPolicy;
use crate::types::{pow10, Address, Amount, NATIVE_DECIMALS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_name() -> String {
    "Dividend Token".to_string()
}

fn default_symbol() -> String {
    "DVT".to_string()
}

fn default_decimals() -> u8 {
    NATIVE_DECIMALS
}

fn default_token_address() -> Address {
    Address::derive(b"dividend-token", b"main")
}

fn default_owner() -> Address {
    Address::derive(b"dividend-token", b"owner")
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub token_decimals: u8,
    #[serde(default = "default_decimals")]
    pub native_decimals: u8,
    #[serde(default)]
    pub dust_policy: DustPolicy,
    #[serde(default = "default_token_address")]
    pub token_address: Address,
    /// Account holding the owner credential when an operation log is replayed.
    #[serde(default = "default_owner")]
    pub owner: Address,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            symbol: default_symbol(),
            token_decimals: default_decimals(),
            native_decimals: default_decimals(),
            dust_policy: DustPolicy::default(),
            token_address: default_token_address(),
            owner: default_owner(),
        }
    }
}

/// Fixed native-to-token exchange: one native unit buys one whole token,
/// scaled by the decimal difference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeRate {
    Multiply(Amount),
    Divide(Amount),
}

impl ExchangeRate {
    /// Token base units minted for `value` native base units; `None` on overflow.
    pub fn tokens_for(&self, value: Amount) -> Option<Amount> {
        match *self {
            ExchangeRate::Multiply(factor) => value.checked_mul(factor),
            ExchangeRate::Divide(divisor) => Some(value / divisor),
        }
    }
}

impl TokenConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: TokenConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty".into()));
        }
        if self.token_address.is_zero() {
            return Err(ConfigError::Invalid(
                "token address must not be the zero address".into(),
            ));
        }
        if self.owner.is_zero() {
            return Err(ConfigError::Invalid(
                "owner must not be the zero address".into(),
            ));
        }
        self.exchange_rate()?;
        Ok(())
    }

    pub fn exchange_rate(&self) -> Result<ExchangeRate, ConfigError> {
        let too_large = || {
            ConfigError::Invalid(format!(
                "decimal gap between token ({}) and native ({}) is too large",
                self.token_decimals, self.native_decimals
            ))
        };
        if self.token_decimals >= self.native_decimals {
            pow10(self.token_decimals - self.native_decimals)
                .map(ExchangeRate::Multiply)
                .ok_or_else(too_large)
        } else {
            pow10(self.native_decimals - self.token_decimals)
                .map(ExchangeRate::Divide)
                .ok_or_else(too_large)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_one_to_one() {
        let config = TokenConfig::default();
        config.validate().unwrap();
        assert_eq!(config.exchange_rate().unwrap(), ExchangeRate::Multiply(1));
        assert_eq!(config.dust_policy, DustPolicy::Discard);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: TokenConfig =
            serde_json::from_str(r#"{"symbol":"ABC","dust_policy":"carry_forward"}"#).unwrap();
        assert_eq!(config.symbol, "ABC");
        assert_eq!(config.name, "Dividend Token");
        assert_eq!(config.dust_policy, DustPolicy::CarryForward);
        assert_eq!(config.token_decimals, 18);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<TokenConfig>(r#"{"admin":"me"}"#).is_err());
    }

    #[test]
    fn exchange_rate_follows_decimals() {
        let config = TokenConfig {
            token_decimals: 9,
            ..TokenConfig::default()
        };
        let rate = config.exchange_rate().unwrap();
        assert_eq!(rate, ExchangeRate::Divide(1_000_000_000));
        assert_eq!(rate.tokens_for(2_500_000_000), Some(2));

        let config = TokenConfig {
            token_decimals: 20,
            ..TokenConfig::default()
        };
        assert_eq!(config.exchange_rate().unwrap().tokens_for(3), Some(300));
    }

    #[test]
    fn owner_defaults_and_must_be_nonzero() {
        let config = TokenConfig::default();
        assert_eq!(
            config.owner.to_string(),
            "0x72214357e66b12d2fe84d51fc3e1af5f3144eaf4"
        );
        let config = TokenConfig {
            owner: Address::ZERO,
            ..TokenConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn oversized_decimal_gap_is_invalid() {
        let config = TokenConfig {
            token_decimals: 60,
            native_decimals: 0,
            ..TokenConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}

//! Ether-denominated dividend-paying token.
//!
//! The crate is organised bottom-up:
//!
//! * [`registry`]: enumerable holder set with O(1) insert/remove.
//! * [`ledger`]: balances, total supply, events and state commitments.
//! * [`dividends`]: magnified-dividend-per-share accounting. Distributions
//!   and withdrawals never iterate over holders.
//! * [`gateway`]: the token's entry points, including the owner sweep
//!   guarded by an [`OwnerCap`].
//! * [`replay`]: deterministic replay of a JSON-lines operation log.

pub mod config;
pub mod dividends;
pub mod gateway;
pub mod ledger;
pub mod registry;
pub mod replay;
pub mod types;

mod error;

pub use config::TokenConfig;
pub use error::{TokenError, TokenResult};
pub use gateway::{DividendToken, OwnerCap, Payee, PaymentRefused, Wallet};
pub use types::{Address, Amount, MAGNITUDE};

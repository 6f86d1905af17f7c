use std::collections::BTreeMap;

use ethnum::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dividends::DividendDistributor;
use crate::error::{TokenError, TokenResult};
use crate::registry::HolderRegistry;
use crate::types::{wide, Address, Amount};

mod snapshot;

pub use snapshot::{compute_state_root, TokenSnapshot};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted {
        to: Address,
        amount: Amount,
        paid: Amount,
    },
    Burned {
        from: Address,
        amount: Amount,
    },
    Transferred {
        from: Address,
        to: Address,
        amount: Amount,
    },
    DividendsDistributed {
        from: Address,
        amount: Amount,
        #[serde(with = "wide::unsigned")]
        per_share_increase: U256,
    },
    DividendWithdrawn {
        holder: Address,
        amount: Amount,
    },
    NativeSwept {
        to: Address,
        amount: Amount,
    },
}

/// Balances and total supply. Only nonzero balances are stored, so the key
/// set always matches the holder registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    balances: BTreeMap<Address, Amount>,
    total_supply: Amount,
}

fn signed(amount: Amount) -> TokenResult<i128> {
    i128::try_from(amount).map_err(|_| TokenError::Overflow("balance delta"))
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balances(&self) -> &BTreeMap<Address, Amount> {
        &self.balances
    }

    fn set_balance(&mut self, account: Address, balance: Amount) {
        if balance == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, balance);
        }
    }

    pub fn mint(
        &mut self,
        registry: &mut HolderRegistry,
        dividends: &mut DividendDistributor,
        to: Address,
        amount: Amount,
    ) -> TokenResult<()> {
        if amount == 0 {
            return Err(TokenError::InvalidAmount("mint must be positive"));
        }
        if to.is_zero() {
            return Err(TokenError::InvalidRecipient(to));
        }
        let previous = self.balance_of(&to);
        let balance = previous
            .checked_add(amount)
            .ok_or(TokenError::Overflow("balance"))?;
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::Overflow("total supply"))?;
        let correction = dividends.stage_balance_change(&to, signed(amount)?)?;

        self.set_balance(to, balance);
        self.total_supply = total_supply;
        if previous == 0 {
            registry.insert(to);
        }
        dividends.commit(correction);
        debug!(%to, amount, total_supply, "minted");
        Ok(())
    }

    pub fn burn(
        &mut self,
        registry: &mut HolderRegistry,
        dividends: &mut DividendDistributor,
        from: Address,
        amount: Amount,
    ) -> TokenResult<()> {
        if amount == 0 {
            return Err(TokenError::InvalidAmount("burn must be positive"));
        }
        let have = self.balance_of(&from);
        let balance = have
            .checked_sub(amount)
            .ok_or(TokenError::InsufficientBalance {
                account: from,
                have,
                need: amount,
            })?;
        let correction = dividends.stage_balance_change(&from, -signed(amount)?)?;

        if balance == 0 {
            registry.remove(&from)?;
        }
        self.set_balance(from, balance);
        self.total_supply -= amount;
        dividends.commit(correction);
        debug!(%from, amount, total_supply = self.total_supply, "burned");
        Ok(())
    }

    pub fn transfer(
        &mut self,
        registry: &mut HolderRegistry,
        dividends: &mut DividendDistributor,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> TokenResult<()> {
        if to.is_zero() {
            return Err(TokenError::InvalidRecipient(to));
        }
        let have = self.balance_of(&from);
        let from_balance = have
            .checked_sub(amount)
            .ok_or(TokenError::InsufficientBalance {
                account: from,
                have,
                need: amount,
            })?;
        if amount == 0 || from == to {
            return Ok(());
        }
        let previous_to = self.balance_of(&to);
        let to_balance = previous_to
            .checked_add(amount)
            .ok_or(TokenError::Overflow("balance"))?;
        let delta = signed(amount)?;
        let debit = dividends.stage_balance_change(&from, -delta)?;
        let credit = dividends.stage_balance_change(&to, delta)?;

        // the only fallible commit step goes first
        if from_balance == 0 {
            registry.remove(&from)?;
        }
        if previous_to == 0 {
            registry.insert(to);
        }
        self.set_balance(from, from_balance);
        self.set_balance(to, to_balance);
        dividends.commit(debit);
        dividends.commit(credit);
        debug!(%from, %to, amount, "transferred");
        Ok(())
    }

    /// Σ balances must equal total supply, and the registry must list exactly
    /// the accounts with a nonzero balance.
    pub fn check_consistency(&self, registry: &HolderRegistry) -> TokenResult<()> {
        registry.check_consistency()?;
        let mut sum: Amount = 0;
        for (account, balance) in &self.balances {
            sum = sum
                .checked_add(*balance)
                .ok_or(TokenError::Overflow("balance sum"))?;
            if !registry.contains(account) {
                return Err(TokenError::InvalidState(format!(
                    "{account} holds {balance} but is not registered"
                )));
            }
        }
        if sum != self.total_supply {
            return Err(TokenError::InvalidState(format!(
                "balances sum to {sum}, total supply is {}",
                self.total_supply
            )));
        }
        if registry.len() != self.balances.len() {
            return Err(TokenError::InvalidState(format!(
                "registry lists {} holders, ledger has {}",
                registry.len(),
                self.balances.len()
            )));
        }
        Ok(())
    }
}

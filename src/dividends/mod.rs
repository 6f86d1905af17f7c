//! Dividend accounting without per-holder iteration.
//!
//! A single accumulator, the magnified dividend per share, grows with every
//! distribution. A holder's entitlement is `per_share * balance`, adjusted by
//! a signed correction that absorbs every balance change:
//!
//! ```text
//! accumulative(h) = (per_share * balance(h) + correction(h)) / MAGNITUDE
//! withdrawable(h) = accumulative(h) - withdrawn(h)
//! ```
//!
//! When a balance moves by `delta`, `correction -= per_share * delta`, which
//! leaves `accumulative` unchanged until the next distribution. Both the
//! accumulator and the corrections are 256-bit.

use std::collections::BTreeMap;

use ethnum::{I256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{TokenError, TokenResult};
use crate::types::{wide, Address, Amount, MAGNITUDE};

/// What happens to `amount * MAGNITUDE mod supply` after a distribution.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DustPolicy {
    /// The remainder is dropped.
    #[default]
    Discard,
    /// The remainder is added to the next distribution's numerator.
    CarryForward,
}

/// Per-address dividend bookkeeping. Never purged, so an address that leaves
/// and later rejoins the holder set cannot be paid twice.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DividendAccount {
    pub withdrawn: Amount,
    #[serde(with = "wide::signed")]
    pub correction: I256,
}

impl Default for DividendAccount {
    fn default() -> Self {
        Self {
            withdrawn: 0,
            correction: I256::ZERO,
        }
    }
}

/// A correction computed against the current accumulator but not yet stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct StagedCorrection {
    holder: Address,
    correction: I256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub amount: Amount,
    #[serde(with = "wide::unsigned")]
    pub per_share_increase: U256,
    /// Remainder in magnified units after this division.
    pub remainder: u128,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DividendDistributor {
    address: Address,
    policy: DustPolicy,
    magnified_dividend_per_share: U256,
    total_distributed: Amount,
    total_withdrawn: Amount,
    carried_remainder: u128,
    discarded_remainder: u128,
    distributions: u64,
    accounts: BTreeMap<Address, DividendAccount>,
}

fn to_signed(value: U256, what: &'static str) -> TokenResult<I256> {
    if value > I256::MAX.as_u256() {
        return Err(TokenError::Overflow(what));
    }
    Ok(value.as_i256())
}

fn widen(value: u128) -> I256 {
    U256::from(value).as_i256()
}

/// Narrows a non-negative value back to an amount.
fn to_amount(value: I256, what: &'static str) -> TokenResult<Amount> {
    let (high, low) = value.into_words();
    if high != 0 {
        return Err(TokenError::Overflow(what));
    }
    Ok(low as Amount)
}

impl DividendDistributor {
    pub fn new(address: Address, policy: DustPolicy) -> Self {
        Self {
            address,
            policy,
            magnified_dividend_per_share: U256::ZERO,
            total_distributed: 0,
            total_withdrawn: 0,
            carried_remainder: 0,
            discarded_remainder: 0,
            distributions: 0,
            accounts: BTreeMap::new(),
        }
    }

    /// Identity that value deposits are addressed to.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn policy(&self) -> DustPolicy {
        self.policy
    }

    pub fn magnified_dividend_per_share(&self) -> U256 {
        self.magnified_dividend_per_share
    }

    pub fn total_distributed(&self) -> Amount {
        self.total_distributed
    }

    pub fn total_withdrawn(&self) -> Amount {
        self.total_withdrawn
    }

    pub fn carried_remainder(&self) -> u128 {
        self.carried_remainder
    }

    /// Sum of all dropped remainders, in magnified units.
    pub fn discarded_remainder(&self) -> u128 {
        self.discarded_remainder
    }

    pub fn distributions(&self) -> u64 {
        self.distributions
    }

    pub fn account(&self, holder: &Address) -> Option<&DividendAccount> {
        self.accounts.get(holder)
    }

    pub fn accounts(&self) -> &BTreeMap<Address, DividendAccount> {
        &self.accounts
    }

    /// Value held for holders: distributed but not yet withdrawn.
    pub fn pool(&self) -> Amount {
        self.total_distributed - self.total_withdrawn
    }

    /// Spreads `amount` over `total_supply` by raising the accumulator.
    pub fn distribute(&mut self, amount: Amount, total_supply: Amount) -> TokenResult<Distribution> {
        if amount == 0 {
            return Err(TokenError::InvalidAmount("distribution must be positive"));
        }
        if total_supply == 0 {
            return Err(TokenError::NoHolders(amount));
        }

        let mut numerator = U256::from(amount)
            .checked_mul(U256::from(MAGNITUDE))
            .ok_or(TokenError::Overflow("distribution numerator"))?;
        if self.policy == DustPolicy::CarryForward {
            numerator = numerator
                .checked_add(U256::from(self.carried_remainder))
                .ok_or(TokenError::Overflow("distribution numerator"))?;
        }
        let supply = U256::from(total_supply);
        let per_share_increase = numerator / supply;
        // below the supply, so it fits the low word
        let (_, remainder) = (numerator % supply).into_words();

        let per_share = self
            .magnified_dividend_per_share
            .checked_add(per_share_increase)
            .ok_or(TokenError::Overflow("dividend per share"))?;
        // corrections are signed, keep the accumulator in their range
        to_signed(per_share, "dividend per share")?;
        let total_distributed = self
            .total_distributed
            .checked_add(amount)
            .ok_or(TokenError::Overflow("total distributed"))?;

        self.magnified_dividend_per_share = per_share;
        self.total_distributed = total_distributed;
        match self.policy {
            DustPolicy::Discard => {
                self.discarded_remainder = self.discarded_remainder.saturating_add(remainder)
            }
            DustPolicy::CarryForward => self.carried_remainder = remainder,
        }
        self.distributions += 1;

        info!(
            amount,
            total_supply,
            %per_share_increase,
            remainder,
            "dividends distributed"
        );
        Ok(Distribution {
            amount,
            per_share_increase,
            remainder,
        })
    }

    /// Entitlement before subtracting what was already withdrawn.
    pub fn accumulative_dividend_of(&self, holder: &Address, balance: Amount) -> TokenResult<Amount> {
        let correction = self
            .accounts
            .get(holder)
            .map_or(I256::ZERO, |a| a.correction);
        let per_share = to_signed(self.magnified_dividend_per_share, "dividend per share")?;
        let magnified = per_share
            .checked_mul(widen(balance))
            .and_then(|v| v.checked_add(correction))
            .ok_or(TokenError::Overflow("accumulative dividend"))?;
        if magnified.is_negative() {
            return Err(TokenError::InvalidState(format!(
                "negative entitlement for {holder}"
            )));
        }
        to_amount(magnified / widen(MAGNITUDE), "accumulative dividend")
    }

    pub fn withdrawn_dividend_of(&self, holder: &Address) -> Amount {
        self.accounts.get(holder).map_or(0, |a| a.withdrawn)
    }

    pub fn withdrawable_dividend_of(&self, holder: &Address, balance: Amount) -> TokenResult<Amount> {
        let accumulative = self.accumulative_dividend_of(holder, balance)?;
        accumulative
            .checked_sub(self.withdrawn_dividend_of(holder))
            .ok_or_else(|| {
                TokenError::InvalidState(format!("{holder} withdrew more than accumulated"))
            })
    }

    /// Records a withdrawal of everything currently owed to `holder` and
    /// returns the amount. Zero means there was nothing to pay; the caller
    /// must issue the external transfer only after this returns.
    pub fn withdraw(&mut self, holder: &Address, balance: Amount) -> TokenResult<Amount> {
        let amount = self.withdrawable_dividend_of(holder, balance)?;
        if amount == 0 {
            debug!(%holder, "nothing to withdraw");
            return Ok(0);
        }
        let withdrawn = self
            .withdrawn_dividend_of(holder)
            .checked_add(amount)
            .ok_or(TokenError::Overflow("withdrawn dividends"))?;
        let total_withdrawn = self
            .total_withdrawn
            .checked_add(amount)
            .ok_or(TokenError::Overflow("total withdrawn"))?;

        self.accounts.entry(*holder).or_default().withdrawn = withdrawn;
        self.total_withdrawn = total_withdrawn;
        Ok(amount)
    }

    /// Undoes a recorded withdrawal whose payment was refused.
    pub(crate) fn revert_withdraw(&mut self, holder: &Address, amount: Amount) {
        if let Some(account) = self.accounts.get_mut(holder) {
            account.withdrawn -= amount;
        }
        self.total_withdrawn -= amount;
    }

    /// Computes the correction for a balance change of `delta` without storing it.
    pub fn stage_balance_change(&self, holder: &Address, delta: i128) -> TokenResult<StagedCorrection> {
        let current = self
            .accounts
            .get(holder)
            .map_or(I256::ZERO, |a| a.correction);
        let per_share = to_signed(self.magnified_dividend_per_share, "dividend per share")?;
        let correction = per_share
            .checked_mul(I256::from(delta))
            .and_then(|shift| current.checked_sub(shift))
            .ok_or(TokenError::Overflow("dividend correction"))?;
        Ok(StagedCorrection {
            holder: *holder,
            correction,
        })
    }

    pub fn commit(&mut self, staged: StagedCorrection) {
        self.accounts.entry(staged.holder).or_default().correction = staged.correction;
    }

    /// Keeps the holder's pending entitlement fixed across a balance change.
    pub fn on_balance_change(&mut self, holder: &Address, delta: i128) -> TokenResult<()> {
        let staged = self.stage_balance_change(holder, delta)?;
        self.commit(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn distributor() -> DividendDistributor {
        DividendDistributor::new(addr(0xdd), DustPolicy::Discard)
    }

    #[test]
    fn single_holder_receives_whole_distribution() {
        let mut d = distributor();
        d.on_balance_change(&addr(1), 1_000).unwrap();
        d.distribute(100, 1_000).unwrap();
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 1_000).unwrap(), 100);
    }

    #[test]
    fn balance_move_keeps_entitlement() {
        let mut d = distributor();
        d.on_balance_change(&addr(1), 1_000).unwrap();
        d.distribute(100, 1_000).unwrap();

        d.on_balance_change(&addr(1), -1_000).unwrap();
        d.on_balance_change(&addr(2), 1_000).unwrap();

        assert_eq!(d.withdrawable_dividend_of(&addr(1), 0).unwrap(), 100);
        assert_eq!(d.withdrawable_dividend_of(&addr(2), 1_000).unwrap(), 0);

        d.distribute(50, 1_000).unwrap();
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 0).unwrap(), 100);
        assert_eq!(d.withdrawable_dividend_of(&addr(2), 1_000).unwrap(), 50);
    }

    #[test]
    fn withdraw_records_then_reports_zero() {
        let mut d = distributor();
        d.on_balance_change(&addr(1), 10).unwrap();
        d.distribute(7, 10).unwrap();
        assert_eq!(d.withdraw(&addr(1), 10).unwrap(), 7);
        assert_eq!(d.withdraw(&addr(1), 10).unwrap(), 0);
        assert_eq!(d.withdrawn_dividend_of(&addr(1)), 7);
        assert_eq!(d.total_withdrawn(), 7);
        assert_eq!(d.pool(), 0);
    }

    #[test]
    fn revert_withdraw_restores_entitlement() {
        let mut d = distributor();
        d.on_balance_change(&addr(1), 10).unwrap();
        d.distribute(7, 10).unwrap();
        let paid = d.withdraw(&addr(1), 10).unwrap();
        d.revert_withdraw(&addr(1), paid);
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 10).unwrap(), 7);
        assert_eq!(d.total_withdrawn(), 0);
    }

    #[test]
    fn distribute_requires_supply_and_amount() {
        let mut d = distributor();
        assert_eq!(d.distribute(5, 0), Err(TokenError::NoHolders(5)));
        assert!(matches!(d.distribute(0, 10), Err(TokenError::InvalidAmount(_))));
        assert_eq!(d.total_distributed(), 0);
        assert_eq!(d.distributions(), 0);
    }

    #[test]
    fn discard_policy_drops_remainder() {
        let mut d = distributor();
        for h in 1..=3 {
            d.on_balance_change(&addr(h), 1).unwrap();
        }
        let dist = d.distribute(1, 3).unwrap();
        assert_eq!(dist.remainder, MAGNITUDE % 3);
        assert_eq!(d.carried_remainder(), 0);
        assert_eq!(d.discarded_remainder(), MAGNITUDE % 3);
        // each holder is owed a third of a unit, which floors to zero
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 1).unwrap(), 0);
    }

    #[test]
    fn carry_forward_policy_keeps_remainder() {
        let mut d = DividendDistributor::new(addr(0xdd), DustPolicy::CarryForward);
        d.on_balance_change(&addr(1), 3).unwrap();
        d.distribute(1, 3).unwrap();
        assert_eq!(d.carried_remainder(), MAGNITUDE % 3);
        d.distribute(2, 3).unwrap();
        // (MAGNITUDE + 2 * MAGNITUDE) divides evenly once the carry is added
        assert_eq!(d.carried_remainder(), 0);
        assert_eq!(d.magnified_dividend_per_share(), U256::from(MAGNITUDE));
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 3).unwrap(), 3);
    }

    #[test]
    fn oversized_distribution_fails_closed() {
        let mut d = distributor();
        d.on_balance_change(&addr(1), 1).unwrap();
        d.distribute(u128::MAX, 1).unwrap();
        let per_share = d.magnified_dividend_per_share();
        assert_eq!(
            d.distribute(1, 1),
            Err(TokenError::Overflow("total distributed"))
        );
        assert_eq!(d.magnified_dividend_per_share(), per_share);
        assert_eq!(d.total_distributed(), u128::MAX);
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 1).unwrap(), u128::MAX);
    }

    #[test]
    fn dust_supply_distribution_leaves_room_for_large_balances() {
        let mut d = distributor();
        let ether = 1_000_000_000_000_000_000u128;
        d.on_balance_change(&addr(1), 1).unwrap();
        d.distribute(ether, 1).unwrap();
        assert_eq!(d.withdraw(&addr(1), 1).unwrap(), ether);

        d.on_balance_change(&addr(2), 1_000 * ether as i128).unwrap();
        d.on_balance_change(&addr(2), -(ether as i128)).unwrap();
        assert_eq!(d.withdrawable_dividend_of(&addr(2), 999 * ether).unwrap(), 0);
    }

    #[test]
    fn correction_overflow_fails_closed() {
        let mut d = distributor();
        d.on_balance_change(&addr(1), 1).unwrap();
        d.distribute(u128::MAX, 1).unwrap();
        let err = d.on_balance_change(&addr(2), i128::MAX).unwrap_err();
        assert_eq!(err, TokenError::Overflow("dividend correction"));
        assert_eq!(d.account(&addr(2)), None);
    }

    #[test]
    fn staged_correction_is_not_visible_until_commit() {
        let mut d = distributor();
        d.on_balance_change(&addr(1), 4).unwrap();
        d.distribute(4, 4).unwrap();
        let staged = d.stage_balance_change(&addr(1), -4).unwrap();
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 4).unwrap(), 4);
        d.commit(staged);
        assert_eq!(d.withdrawable_dividend_of(&addr(1), 0).unwrap(), 4);
    }
}

//! Entry points of the token: value deposits, balance operations, dividend
//! withdrawal and the owner sweep.
//!
//! External value transfers go through [`Payee`], which receives the token
//! itself and may call back into it. Every bookkeeping step of an operation is
//! finished before the payee is invoked, and while the payee runs all
//! state-changing entry points fail with [`TokenError::ReentrancyDetected`].

use std::collections::VecDeque;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ExchangeRate, TokenConfig};
use crate::dividends::DividendDistributor;
use crate::error::{TokenError, TokenResult};
use crate::ledger::{compute_state_root, Ledger, LedgerEvent, TokenSnapshot};
use crate::registry::HolderRegistry;
use crate::types::{Address, Amount, MAGNITUDE};

mod wallet;

pub use wallet::Wallet;

/// Most recent events kept in memory; older ones are only counted.
pub const EVENT_HISTORY: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PaymentRefused(pub String);

/// Receiving side of an external value transfer.
pub trait Payee {
    fn address(&self) -> Address;

    /// Called once the token has settled its own books. May call back into
    /// `token`; state-changing calls are rejected until this returns.
    fn accept(&mut self, amount: Amount, token: &mut DividendToken) -> Result<(), PaymentRefused>;
}

/// Credential for the privileged sweep. Issued once, at construction.
pub struct OwnerCap {
    secret: [u8; 32],
}

impl OwnerCap {
    fn issue() -> (Self, [u8; 32]) {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let cap = OwnerCap { secret };
        let digest = cap.digest();
        (cap, digest)
    }

    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"owner-cap");
        hasher.update(self.secret);
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for OwnerCap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OwnerCap(..)")
    }
}

pub struct DividendToken {
    config: TokenConfig,
    rate: ExchangeRate,
    ledger: Ledger,
    registry: HolderRegistry,
    dividends: DividendDistributor,
    native_reserve: Amount,
    owner_digest: [u8; 32],
    transfer_in_flight: bool,
    events: VecDeque<LedgerEvent>,
    event_count: u64,
}

impl DividendToken {
    pub fn new(config: TokenConfig) -> Result<(Self, OwnerCap), ConfigError> {
        config.validate()?;
        let rate = config.exchange_rate()?;
        let tracker = Address::derive(b"dividend-tracker", config.token_address.as_bytes());
        let dividends = DividendDistributor::new(tracker, config.dust_policy);
        let (cap, owner_digest) = OwnerCap::issue();
        info!(
            token = %config.token_address,
            %tracker,
            symbol = %config.symbol,
            "token created"
        );
        let token = Self {
            config,
            rate,
            ledger: Ledger::new(),
            registry: HolderRegistry::new(),
            dividends,
            native_reserve: 0,
            owner_digest,
            transfer_in_flight: false,
            events: VecDeque::new(),
            event_count: 0,
        };
        Ok((token, cap))
    }

    fn ensure_idle(&self) -> TokenResult<()> {
        if self.transfer_in_flight {
            warn!("re-entrant call rejected");
            return Err(TokenError::ReentrancyDetected);
        }
        Ok(())
    }

    // ----- reads -----

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.config.token_decimals
    }

    pub fn address(&self) -> Address {
        self.config.token_address
    }

    pub fn dividend_tracker(&self) -> Address {
        self.dividends.address()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.ledger.balance_of(account)
    }

    pub fn total_supply(&self) -> Amount {
        self.ledger.total_supply()
    }

    pub fn withdrawable_dividend_of(&self, holder: &Address) -> TokenResult<Amount> {
        self.dividends
            .withdrawable_dividend_of(holder, self.ledger.balance_of(holder))
    }

    pub fn accumulative_dividend_of(&self, holder: &Address) -> TokenResult<Amount> {
        self.dividends
            .accumulative_dividend_of(holder, self.ledger.balance_of(holder))
    }

    pub fn withdrawn_dividend_of(&self, holder: &Address) -> Amount {
        self.dividends.withdrawn_dividend_of(holder)
    }

    pub fn total_dividends_distributed(&self) -> Amount {
        self.dividends.total_distributed()
    }

    pub fn total_dividends_withdrawn(&self) -> Amount {
        self.dividends.total_withdrawn()
    }

    /// Native value held at the token address (from mints), sweepable by the owner.
    pub fn native_reserve(&self) -> Amount {
        self.native_reserve
    }

    /// Native value held at the dividend tracker address for holders.
    pub fn dividend_pool(&self) -> Amount {
        self.dividends.pool()
    }

    pub fn holders(&self) -> &HolderRegistry {
        &self.registry
    }

    pub fn dividends(&self) -> &DividendDistributor {
        &self.dividends
    }

    /// The last [`EVENT_HISTORY`] events, oldest first.
    pub fn events(&self) -> impl ExactSizeIterator<Item = &LedgerEvent> {
        self.events.iter()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    fn emit(&mut self, event: LedgerEvent) {
        if self.events.len() == EVENT_HISTORY {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.event_count += 1;
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(
            &self.ledger,
            &self.registry,
            &self.dividends,
            self.native_reserve,
        )
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            name: self.config.name.clone(),
            symbol: self.config.symbol.clone(),
            total_supply: self.ledger.total_supply(),
            native_reserve: self.native_reserve,
            magnified_dividend_per_share: self.dividends.magnified_dividend_per_share(),
            total_distributed: self.dividends.total_distributed(),
            total_withdrawn: self.dividends.total_withdrawn(),
            carried_remainder: self.dividends.carried_remainder(),
            balances: self.ledger.balances().clone(),
            dividend_accounts: self.dividends.accounts().clone(),
            holders: self.registry.clone(),
            events: self.event_count,
            state_root: hex::encode(self.state_root()),
        }
    }

    /// Checks ledger/registry agreement and that every distributed unit is
    /// either withdrawn, still owed, or bounded truncation dust.
    pub fn verify_invariants(&self) -> TokenResult<()> {
        self.ledger.check_consistency(&self.registry)?;

        let mut owed: Amount = 0;
        for account in self.dividends.accounts().keys() {
            let pending = self.withdrawable_dividend_of(account)?;
            owed = owed
                .checked_add(pending)
                .ok_or(TokenError::Overflow("outstanding dividends"))?;
        }
        let gap = self
            .dividends
            .pool()
            .checked_sub(owed)
            .ok_or_else(|| {
                TokenError::InvalidState(format!(
                    "holders are owed {owed} but the pool holds {}",
                    self.dividends.pool()
                ))
            })?;
        // per-holder floor plus truncated per-share remainders
        let remainders = self
            .dividends
            .discarded_remainder()
            .saturating_add(self.dividends.carried_remainder());
        let bound = (self.dividends.accounts().len() as u128)
            .saturating_add(remainders.div_ceil(MAGNITUDE));
        if gap > bound {
            return Err(TokenError::InvalidState(format!(
                "undistributable dust {gap} exceeds bound {bound}"
            )));
        }
        Ok(())
    }

    // ----- value deposits -----

    /// Value arriving with no payload. `target` selects the recipient
    /// identity: the token mints, the dividend tracker distributes.
    pub fn deposit(&mut self, sender: Address, target: Address, value: Amount) -> TokenResult<()> {
        self.ensure_idle()?;
        if target == self.address() {
            self.receive(sender, value)
        } else if target == self.dividend_tracker() {
            self.deposit_dividends(sender, value)
        } else {
            Err(TokenError::InvalidRecipient(target))
        }
    }

    /// Mints tokens to `sender` at the fixed exchange rate.
    pub fn receive(&mut self, sender: Address, value: Amount) -> TokenResult<()> {
        self.ensure_idle()?;
        if value == 0 {
            return Err(TokenError::InvalidAmount("deposit must be positive"));
        }
        let tokens = self
            .rate
            .tokens_for(value)
            .ok_or(TokenError::Overflow("exchange"))?;
        if tokens == 0 {
            return Err(TokenError::InvalidAmount("deposit is below one token unit"));
        }
        let reserve = self
            .native_reserve
            .checked_add(value)
            .ok_or(TokenError::Overflow("native reserve"))?;
        self.ledger.mint(
            &mut self.registry,
            &mut self.dividends,
            sender,
            tokens,
        )?;
        self.native_reserve = reserve;
        self.emit(LedgerEvent::Minted {
            to: sender,
            amount: tokens,
            paid: value,
        });
        Ok(())
    }

    /// Spreads `value` across current holders.
    pub fn deposit_dividends(&mut self, sender: Address, value: Amount) -> TokenResult<()> {
        self.ensure_idle()?;
        let distribution = self
            .dividends
            .distribute(value, self.ledger.total_supply())?;
        self.emit(LedgerEvent::DividendsDistributed {
            from: sender,
            amount: value,
            per_share_increase: distribution.per_share_increase,
        });
        Ok(())
    }

    // ----- balance operations -----

    pub fn transfer(&mut self, caller: Address, to: Address, amount: Amount) -> TokenResult<bool> {
        self.ensure_idle()?;
        self.ledger.transfer(
            &mut self.registry,
            &mut self.dividends,
            caller,
            to,
            amount,
        )?;
        self.emit(LedgerEvent::Transferred {
            from: caller,
            to,
            amount,
        });
        Ok(true)
    }

    /// Destroys `amount` of the caller's tokens. No native value is returned.
    pub fn burn(&mut self, caller: Address, amount: Amount) -> TokenResult<()> {
        self.ensure_idle()?;
        self.ledger
            .burn(&mut self.registry, &mut self.dividends, caller, amount)?;
        self.emit(LedgerEvent::Burned {
            from: caller,
            amount,
        });
        Ok(())
    }

    // ----- outgoing value -----

    /// Pays the payee everything it is owed. Returns the amount paid; zero
    /// when nothing is owed.
    pub fn withdraw(&mut self, payee: &mut dyn Payee) -> TokenResult<Amount> {
        self.ensure_idle()?;
        let holder = payee.address();
        let amount = self
            .dividends
            .withdraw(&holder, self.ledger.balance_of(&holder))?;
        if amount == 0 {
            return Ok(0);
        }
        if let Err(err) = self.pay(payee, amount) {
            self.dividends.revert_withdraw(&holder, amount);
            return Err(err);
        }
        info!(%holder, amount, "dividend withdrawn");
        self.emit(LedgerEvent::DividendWithdrawn { holder, amount });
        Ok(amount)
    }

    /// Sweeps the token's native reserve to `to`. Dividend funds held by the
    /// tracker are not touched.
    pub fn withdraw_ether(&mut self, cap: &OwnerCap, to: &mut dyn Payee) -> TokenResult<Amount> {
        self.ensure_idle()?;
        if cap.digest() != self.owner_digest {
            warn!(caller = %to.address(), "sweep with foreign credential");
            return Err(TokenError::AccessDenied);
        }
        let amount = self.native_reserve;
        if amount == 0 {
            debug!("native reserve already empty");
            return Ok(0);
        }
        self.native_reserve = 0;
        if let Err(err) = self.pay(to, amount) {
            self.native_reserve = amount;
            return Err(err);
        }
        let recipient = to.address();
        info!(%recipient, amount, "native reserve swept");
        self.emit(LedgerEvent::NativeSwept {
            to: recipient,
            amount,
        });
        Ok(amount)
    }

    fn pay(&mut self, payee: &mut dyn Payee, amount: Amount) -> TokenResult<()> {
        let to = payee.address();
        self.transfer_in_flight = true;
        let outcome = payee.accept(amount, self);
        self.transfer_in_flight = false;
        outcome.map_err(|refused| {
            warn!(%to, amount, reason = %refused, "payment refused");
            TokenError::TransferFailed {
                to,
                amount,
                reason: refused.0,
            }
        })
    }
}

use crate::types::{Address, Amount};

use super::{DividendToken, Payee, PaymentRefused};

/// Externally owned account: accepts value and never calls back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Wallet {
    address: Address,
    received: Amount,
    refusing: bool,
}

impl Wallet {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            received: 0,
            refusing: false,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Total value this wallet has been paid by the token.
    pub fn received(&self) -> Amount {
        self.received
    }

    /// A refusing wallet rejects every incoming payment.
    pub fn set_refusing(&mut self, refusing: bool) {
        self.refusing = refusing;
    }
}

impl Payee for Wallet {
    fn address(&self) -> Address {
        self.address
    }

    fn accept(&mut self, amount: Amount, _token: &mut DividendToken) -> Result<(), PaymentRefused> {
        if self.refusing {
            return Err(PaymentRefused(format!("{} refuses payments", self.address)));
        }
        self.received = self
            .received
            .checked_add(amount)
            .ok_or_else(|| PaymentRefused("wallet balance overflow".into()))?;
        Ok(())
    }
}

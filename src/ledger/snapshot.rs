use std::collections::BTreeMap;

use ethnum::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dividends::{DividendAccount, DividendDistributor};
use crate::registry::HolderRegistry;
use crate::types::{wide, Address, Amount};

use super::Ledger;

/// Serializable view of the whole token state plus its commitment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub name: String,
    pub symbol: String,
    pub total_supply: Amount,
    pub native_reserve: Amount,
    #[serde(with = "wide::unsigned")]
    pub magnified_dividend_per_share: U256,
    pub total_distributed: Amount,
    pub total_withdrawn: Amount,
    pub carried_remainder: u128,
    pub balances: BTreeMap<Address, Amount>,
    pub dividend_accounts: BTreeMap<Address, DividendAccount>,
    pub holders: HolderRegistry,
    /// Number of events emitted since construction.
    pub events: u64,
    pub state_root: String,
}

/// SHA-256 commitment over balances, dividend accounts, registry order and
/// distributor totals.
pub fn compute_state_root(
    ledger: &Ledger,
    registry: &HolderRegistry,
    dividends: &DividendDistributor,
    native_reserve: Amount,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"totals");
    hasher.update(ledger.total_supply().to_le_bytes());
    hasher.update(native_reserve.to_le_bytes());
    hasher.update(dividends.magnified_dividend_per_share().to_le_bytes());
    hasher.update(dividends.total_distributed().to_le_bytes());
    hasher.update(dividends.total_withdrawn().to_le_bytes());
    hasher.update(dividends.carried_remainder().to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (account, balance) in ledger.balances() {
        let mut hasher = Sha256::new();
        hasher.update(b"balance");
        hasher.update(account.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, entry) in dividends.accounts() {
        let mut hasher = Sha256::new();
        hasher.update(b"dividend");
        hasher.update(account.as_bytes());
        hasher.update(entry.withdrawn.to_le_bytes());
        hasher.update(entry.correction.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }

    let mut hasher = Sha256::new();
    hasher.update(b"holders");
    for holder in registry.iter() {
        hasher.update(holder.as_bytes());
    }
    leaves.push(hasher.finalize().into());

    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"dividend-token-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

//! Sequential replay of a JSON-lines operation log.
//!
//! Each line is a [`LogEntry`]; sequence numbers must strictly increase.
//! Replaying the same log always yields the same state root.

use std::collections::BTreeMap;
use std::io::BufRead;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ConfigError, TokenConfig};
use crate::error::TokenError;
use crate::gateway::{DividendToken, OwnerCap, Wallet};
use crate::ledger::TokenSnapshot;
use crate::types::{Address, Amount};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("i/o error reading log: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("entry {seq} is not after {previous}")]
    OutOfOrder { seq: u64, previous: u64 },
    #[error("cannot create token: {0}")]
    Setup(#[from] ConfigError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Native value sent to `to` (the token or its dividend tracker).
    Deposit {
        from: Address,
        to: Address,
        value: Amount,
    },
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    Burn {
        from: Address,
        amount: Amount,
    },
    Withdraw {
        holder: Address,
    },
    /// Sweep of the native reserve, paid to `caller`. Only the configured
    /// owner holds the credential.
    Sweep {
        caller: Address,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    #[serde(flatten)]
    pub op: Operation,
}

/// Reads a log, skipping blank lines and `#` comments.
pub fn read_log<R: BufRead>(reader: R) -> Result<Vec<LogEntry>, ReplayError> {
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let entry = serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
            line: idx + 1,
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Rejection {
    pub seq: u64,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplayReport {
    pub applied: usize,
    pub rejected: Vec<Rejection>,
    /// Native value paid out to each external account.
    pub payouts: BTreeMap<Address, Amount>,
    pub snapshot: TokenSnapshot,
}

pub struct Replayer {
    token: DividendToken,
    cap: OwnerCap,
    owner: Address,
    wallets: BTreeMap<Address, Wallet>,
    last_seq: Option<u64>,
    applied: usize,
    rejected: Vec<Rejection>,
}

impl Replayer {
    pub fn new(config: TokenConfig) -> Result<Self, ReplayError> {
        let owner = config.owner;
        let (token, cap) = DividendToken::new(config)?;
        Ok(Self {
            token,
            cap,
            owner,
            wallets: BTreeMap::new(),
            last_seq: None,
            applied: 0,
            rejected: Vec::new(),
        })
    }

    pub fn token(&self) -> &DividendToken {
        &self.token
    }

    /// Applies one entry. A rejected operation is recorded and leaves state
    /// untouched; only ordering violations abort the replay.
    pub fn apply(&mut self, entry: &LogEntry) -> Result<Result<(), TokenError>, ReplayError> {
        if let Some(previous) = self.last_seq {
            if entry.seq <= previous {
                return Err(ReplayError::OutOfOrder {
                    seq: entry.seq,
                    previous,
                });
            }
        }
        self.last_seq = Some(entry.seq);

        let outcome = self.execute(&entry.op);
        match &outcome {
            Ok(()) => {
                self.applied += 1;
                debug!(seq = entry.seq, "applied");
            }
            Err(err) => {
                warn!(seq = entry.seq, %err, "rejected");
                self.rejected.push(Rejection {
                    seq: entry.seq,
                    error: err.to_string(),
                });
            }
        }
        Ok(outcome)
    }

    fn execute(&mut self, op: &Operation) -> Result<(), TokenError> {
        match op {
            Operation::Deposit { from, to, value } => self.token.deposit(*from, *to, *value),
            Operation::Transfer { from, to, amount } => {
                self.token.transfer(*from, *to, *amount).map(|_| ())
            }
            Operation::Burn { from, amount } => self.token.burn(*from, *amount),
            Operation::Withdraw { holder } => {
                let wallet = self
                    .wallets
                    .entry(*holder)
                    .or_insert_with(|| Wallet::new(*holder));
                self.token.withdraw(wallet).map(|_| ())
            }
            Operation::Sweep { caller } => {
                if *caller != self.owner {
                    warn!(%caller, "sweep without owner credential");
                    return Err(TokenError::AccessDenied);
                }
                let wallet = self
                    .wallets
                    .entry(*caller)
                    .or_insert_with(|| Wallet::new(*caller));
                self.token.withdraw_ether(&self.cap, wallet).map(|_| ())
            }
        }
    }

    pub fn run<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a LogEntry>,
    ) -> Result<(), ReplayError> {
        for entry in entries {
            // rejections are already recorded for the report
            let _outcome = self.apply(entry)?;
        }
        Ok(())
    }

    pub fn report(&self) -> ReplayReport {
        ReplayReport {
            applied: self.applied,
            rejected: self.rejected.clone(),
            payouts: self
                .wallets
                .iter()
                .map(|(address, wallet)| (*address, wallet.received()))
                .collect(),
            snapshot: self.token.snapshot(),
        }
    }
}

/// Replays `entries` from a fresh token built from `config`.
pub fn replay(config: TokenConfig, entries: &[LogEntry]) -> Result<ReplayReport, ReplayError> {
    let mut replayer = Replayer::new(config)?;
    replayer.run(entries)?;
    Ok(replayer.report())
}

use thiserror::Error;

use crate::types::{Address, Amount};

/// Canonical error type for every token entry point.
///
/// Any variant aborts the whole operation; state is left exactly as it was
/// before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient balance in {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: Address,
        have: Amount,
        need: Amount,
    },

    #[error("invalid recipient {0}")]
    InvalidRecipient(Address),

    #[error("access denied: owner credential required")]
    AccessDenied,

    /// Checked arithmetic failed. Never wraps.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    /// A distribution arrived while total supply is zero.
    #[error("no holders to distribute {0} to")]
    NoHolders(Amount),

    #[error("re-entrant call rejected while a transfer is in flight")]
    ReentrancyDetected,

    /// Registry and ledger disagree.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    /// The receiving side of an external value transfer refused it.
    #[error("transfer of {amount} to {to} failed: {reason}")]
    TransferFailed {
        to: Address,
        amount: Amount,
        reason: String,
    },
}

pub type TokenResult<T> = Result<T, TokenError>;

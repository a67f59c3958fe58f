use std::time::Duration;

use thiserror::Error;

use crate::domain::{
    Currency, Money, MoneyError, TransactionId, TransactionStatus, UserId, WalletId,
};

/// Every failure the ledger core can report. Each one is scoped to a single
/// request; none of them leave partial state behind.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet is inactive: {0}")]
    WalletInactive(WalletId),

    #[error("Sender and receiver wallet are the same: {0}")]
    SameWallet(WalletId),

    #[error("User {user} does not own wallet {wallet}")]
    NotOwner { user: UserId, wallet: WalletId },

    #[error("Insufficient funds in wallet {wallet}: balance {balance}, required {required}")]
    InsufficientFunds {
        wallet: WalletId,
        balance: Money,
        required: Money,
    },

    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Reference id already used: {0}")]
    DuplicateReference(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction already reversed: {0}")]
    AlreadyReversed(TransactionId),

    #[error("Invalid currency: {0:?}")]
    InvalidCurrency(String),

    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("Invalid date range: start is after end")]
    InvalidRange,

    #[error("Concurrent update conflict after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Unit of work timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl LedgerError {
    /// Failures where the same request may succeed if the caller tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Store(_)
                | LedgerError::RateUnavailable(_)
                | LedgerError::ConcurrencyConflict { .. }
                | LedgerError::TimedOut(_)
        )
    }

    /// Rule violations detected before anything was written.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount(_)
                | LedgerError::WalletNotFound(_)
                | LedgerError::WalletInactive(_)
                | LedgerError::SameWallet(_)
                | LedgerError::NotOwner { .. }
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::CurrencyMismatch { .. }
                | LedgerError::InvalidCurrency(_)
                | LedgerError::DuplicateReference(_)
                | LedgerError::AlreadyReversed(_)
                | LedgerError::InvalidTransition { .. }
        )
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        LedgerError::Store(err.into())
    }
}

impl From<MoneyError> for LedgerError {
    fn from(err: MoneyError) -> Self {
        LedgerError::InvalidAmount(err.to_string())
    }
}

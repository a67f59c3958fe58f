#[cfg(test)]
pub(crate) mod faults;
mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Currency, Money, Transaction, TransactionId, TransactionStatus, UserId, Wallet, WalletId,
};
use crate::error::LedgerError;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Bounds of one page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

/// Inclusive occurrence-time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, LedgerError> {
        if start > end {
            return Err(LedgerError::InvalidRange);
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Wallet records. Implementations are handles inside a unit of work.
#[async_trait]
pub trait WalletStore: Send {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError>;

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, LedgerError>;

    /// The user's first wallet by creation time.
    async fn find_wallet_by_user(&mut self, user_id: UserId)
    -> Result<Option<Wallet>, LedgerError>;

    async fn list_wallets_by_user(&mut self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError>;

    /// Take the write lock on the given wallets for the rest of the unit of
    /// work. Must be the first statement of a unit of work that writes;
    /// callers pass ids in ascending order. Unknown ids are ignored.
    async fn lock_wallets(&mut self, ids: &[WalletId]) -> Result<(), LedgerError>;

    /// Unconditional write; the caller computed `balance` under lock.
    async fn update_balance(&mut self, id: WalletId, balance: Money) -> Result<(), LedgerError>;

    /// Relabel only; rescaling the balance is the converter's job.
    async fn update_currency(&mut self, id: WalletId, currency: Currency)
    -> Result<(), LedgerError>;

    async fn set_active(&mut self, id: WalletId, active: bool) -> Result<(), LedgerError>;

    async fn get_wallet(&mut self, id: WalletId) -> Result<Wallet, LedgerError> {
        self.find_wallet(id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))
    }

    async fn get_wallet_by_user(&mut self, user_id: UserId) -> Result<Wallet, LedgerError> {
        self.find_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(format!("no wallet for user {user_id}")))
    }
}

/// Transaction records. Append-mostly: only the status of a pending record changes.
#[async_trait]
pub trait TransactionStore: Send {
    /// Insert a pending record; stamps `created_at`/`updated_at`.
    /// Fails with `DuplicateReference` if a live record holds the reference id.
    async fn create_transaction(&mut self, txn: Transaction) -> Result<Transaction, LedgerError>;

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// The live record holding `reference_id`. Failed attempts do not hold
    /// their reference, so the same key can be submitted again.
    async fn find_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// The compensating record pointing at `original`, ignoring failed attempts.
    async fn find_reversal(
        &mut self,
        original: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Fails with `InvalidTransition` when leaving a terminal status.
    async fn update_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError>;

    /// Records where the user owns the sender or receiver wallet, newest
    /// occurrence first, plus the match count before paging.
    async fn list_by_user(
        &mut self,
        user_id: UserId,
        range: Option<DateRange>,
        page: Page,
    ) -> Result<(Vec<Transaction>, i64), LedgerError>;

    async fn get_transaction(&mut self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.find_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }
}

/// One atomic scope over both stores. Dropping it without `commit` discards
/// every write made through it.
#[async_trait]
pub trait UnitOfWork: WalletStore + TransactionStore {
    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Durable store the application layer is built on.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError>;
}

/// Reject a new record that does not start life as pending.
pub(crate) fn ensure_initial(txn: &Transaction) -> Result<(), LedgerError> {
    if txn.status != TransactionStatus::Pending {
        return Err(LedgerError::InvalidTransition {
            from: txn.status,
            to: TransactionStatus::Pending,
        });
    }
    Ok(())
}

//! Fault injection over [`MemoryLedger`] for unit tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    Currency, Money, Transaction, TransactionId, TransactionStatus, UserId, Wallet, WalletId,
};
use crate::error::LedgerError;

use super::{
    DateRange, Ledger, MemoryLedger, Page, TransactionStore, UnitOfWork, WalletStore,
};

/// What goes wrong inside every unit of work the ledger hands out.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Balance writes to this wallet fail
    pub poisoned_balance: Option<WalletId>,
    /// Every currency relabel fails
    pub fail_currency_update: bool,
    /// Commit lands, then the call keeps running this long
    pub slow_commit: Option<Duration>,
}

/// Delegates to a shared [`MemoryLedger`] and injects [`Faults`].
pub struct FaultyLedger {
    inner: MemoryLedger,
    faults: Faults,
}

impl FaultyLedger {
    pub fn new(inner: MemoryLedger, faults: Faults) -> Self {
        Self { inner, faults }
    }
}

struct FaultyUnit {
    inner: Box<dyn UnitOfWork>,
    faults: Faults,
}

fn injected(what: &str) -> LedgerError {
    LedgerError::store(anyhow::anyhow!("disk I/O error during {what}"))
}

#[async_trait]
impl Ledger for FaultyLedger {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        Ok(Box::new(FaultyUnit {
            inner: self.inner.begin().await?,
            faults: self.faults.clone(),
        }))
    }
}

#[async_trait]
impl WalletStore for FaultyUnit {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError> {
        self.inner.insert_wallet(wallet).await
    }

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        self.inner.find_wallet(id).await
    }

    async fn find_wallet_by_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Wallet>, LedgerError> {
        self.inner.find_wallet_by_user(user_id).await
    }

    async fn list_wallets_by_user(&mut self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError> {
        self.inner.list_wallets_by_user(user_id).await
    }

    async fn lock_wallets(&mut self, ids: &[WalletId]) -> Result<(), LedgerError> {
        self.inner.lock_wallets(ids).await
    }

    async fn update_balance(&mut self, id: WalletId, balance: Money) -> Result<(), LedgerError> {
        if self.faults.poisoned_balance == Some(id) {
            return Err(injected("balance update"));
        }
        self.inner.update_balance(id, balance).await
    }

    async fn update_currency(
        &mut self,
        id: WalletId,
        currency: Currency,
    ) -> Result<(), LedgerError> {
        if self.faults.fail_currency_update {
            return Err(injected("currency update"));
        }
        self.inner.update_currency(id, currency).await
    }

    async fn set_active(&mut self, id: WalletId, active: bool) -> Result<(), LedgerError> {
        self.inner.set_active(id, active).await
    }
}

#[async_trait]
impl TransactionStore for FaultyUnit {
    async fn create_transaction(&mut self, txn: Transaction) -> Result<Transaction, LedgerError> {
        self.inner.create_transaction(txn).await
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.inner.find_transaction(id).await
    }

    async fn find_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.inner.find_by_reference(reference_id).await
    }

    async fn find_reversal(
        &mut self,
        original: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.inner.find_reversal(original).await
    }

    async fn update_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        self.inner.update_status(id, status).await
    }

    async fn list_by_user(
        &mut self,
        user_id: UserId,
        range: Option<DateRange>,
        page: Page,
    ) -> Result<(Vec<Transaction>, i64), LedgerError> {
        self.inner.list_by_user(user_id, range, page).await
    }
}

#[async_trait]
impl UnitOfWork for FaultyUnit {
    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let delay = self.faults.slow_commit;
        self.inner.commit().await?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

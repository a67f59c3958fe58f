use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Currency, Money, Transaction, TransactionId, TransactionStatus, UserId, Wallet, WalletId, now,
};
use crate::error::LedgerError;

use super::{
    DateRange, Ledger, Page, TransactionStore, UnitOfWork, WalletStore, ensure_initial,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    wallets: HashMap<WalletId, Wallet>,
    /// Insertion order doubles as the tie-breaker for equal timestamps
    transactions: Vec<Transaction>,
}

/// In-process ledger for tests and embedding. Units of work are serialized
/// by a single async mutex and write to a staged copy until commit.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, staged }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl MemoryUnitOfWork {
    fn wallet_mut(&mut self, id: WalletId) -> Result<&mut Wallet, LedgerError> {
        self.staged
            .wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::WalletNotFound(id.to_string()))
    }

    fn user_wallet_ids(&self, user_id: UserId) -> Vec<WalletId> {
        self.staged
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.id)
            .collect()
    }
}

#[async_trait]
impl WalletStore for MemoryUnitOfWork {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError> {
        if self.staged.wallets.contains_key(&wallet.id) {
            return Err(LedgerError::store(anyhow::anyhow!(
                "Wallet {} already exists",
                wallet.id
            )));
        }
        self.staged.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.staged.wallets.get(&id).cloned())
    }

    async fn find_wallet_by_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Wallet>, LedgerError> {
        Ok(self
            .list_wallets_by_user(user_id)
            .await?
            .into_iter()
            .next())
    }

    async fn list_wallets_by_user(&mut self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError> {
        let mut wallets: Vec<Wallet> = self
            .staged
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(wallets)
    }

    async fn lock_wallets(&mut self, _ids: &[WalletId]) -> Result<(), LedgerError> {
        // The unit of work already holds the ledger-wide lock
        Ok(())
    }

    async fn update_balance(&mut self, id: WalletId, balance: Money) -> Result<(), LedgerError> {
        let wallet = self.wallet_mut(id)?;
        wallet.balance = balance;
        wallet.updated_at = now();
        Ok(())
    }

    async fn update_currency(
        &mut self,
        id: WalletId,
        currency: Currency,
    ) -> Result<(), LedgerError> {
        let wallet = self.wallet_mut(id)?;
        wallet.currency = currency;
        wallet.updated_at = now();
        Ok(())
    }

    async fn set_active(&mut self, id: WalletId, active: bool) -> Result<(), LedgerError> {
        let wallet = self.wallet_mut(id)?;
        wallet.is_active = active;
        wallet.updated_at = now();
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryUnitOfWork {
    async fn create_transaction(
        &mut self,
        mut txn: Transaction,
    ) -> Result<Transaction, LedgerError> {
        ensure_initial(&txn)?;
        for existing in &self.staged.transactions {
            if existing.status == TransactionStatus::Failed {
                continue;
            }
            if existing.reference_id == txn.reference_id {
                return Err(LedgerError::DuplicateReference(txn.reference_id));
            }
            if let Some(original) = txn.reverses {
                if existing.reverses == Some(original) {
                    return Err(LedgerError::AlreadyReversed(original));
                }
            }
        }
        for side in [txn.sender_wallet_id, txn.receiver_wallet_id]
            .into_iter()
            .flatten()
        {
            if !self.staged.wallets.contains_key(&side) {
                return Err(LedgerError::WalletNotFound(side.to_string()));
            }
        }

        let recorded_at = now();
        txn.created_at = recorded_at;
        txn.updated_at = recorded_at;
        self.staged.transactions.push(txn.clone());
        Ok(txn)
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .staged
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn find_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .staged
            .transactions
            .iter()
            .find(|t| t.reference_id == reference_id && t.status != TransactionStatus::Failed)
            .cloned())
    }

    async fn find_reversal(
        &mut self,
        original: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .staged
            .transactions
            .iter()
            .find(|t| t.reverses == Some(original) && t.status != TransactionStatus::Failed)
            .cloned())
    }

    async fn update_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let txn = self
            .staged
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;

        if !txn.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                from: txn.status,
                to: status,
            });
        }
        txn.status = status;
        txn.updated_at = now();
        Ok(())
    }

    async fn list_by_user(
        &mut self,
        user_id: UserId,
        range: Option<DateRange>,
        page: Page,
    ) -> Result<(Vec<Transaction>, i64), LedgerError> {
        let owned = self.user_wallet_ids(user_id);
        let mut matching: Vec<&Transaction> = self
            .staged
            .transactions
            .iter()
            .filter(|t| t.touches_any(&owned))
            .filter(|t| range.is_none_or(|r| r.contains(t.made_at)))
            .collect();

        // Newest first; later inserts win ties
        matching.reverse();
        matching.sort_by(|a, b| {
            b.made_at
                .cmp(&a.made_at)
                .then(b.created_at.cmp(&a.created_at))
        });

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let MemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

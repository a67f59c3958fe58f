use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::Config;
use crate::domain::{Currency, Money, Transaction, TransactionId, UserId, Wallet, WalletId};
use crate::error::LedgerError;
use crate::rates::{RateProvider, StaticRates};
use crate::storage::{Ledger, SqliteLedger};

use super::convert::CurrencyConverter;
use super::history::{HistoryPage, HistoryQuery};
use super::ownership::verify_owner;
use super::transfer::{FundingRequest, TransferOrchestrator, TransferRequest};

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, HTTP handler, etc.).
pub struct LedgerService {
    ledger: Arc<dyn Ledger>,
    orchestrator: TransferOrchestrator,
    converter: CurrencyConverter,
    history: HistoryQuery,
    default_currency: Currency,
}

/// A transaction together with the compensating record that undid it, if any.
pub struct TransactionInfo {
    pub transaction: Transaction,
    pub reversal: Option<Transaction>,
}

impl LedgerService {
    /// Create a new ledger service over any store and rate provider.
    pub fn new(ledger: Arc<dyn Ledger>, rates: Arc<dyn RateProvider>, config: &Config) -> Self {
        Self {
            orchestrator: TransferOrchestrator::new(ledger.clone(), config.execution),
            converter: CurrencyConverter::new(
                ledger.clone(),
                rates,
                config.rate_timeout,
                config.execution,
            ),
            history: HistoryQuery::new(ledger.clone()),
            default_currency: config.default_currency,
            ledger,
        }
    }

    /// Initialize a new database at the configured path.
    pub async fn init(config: &Config) -> Result<Self, LedgerError> {
        let path = database_path(config)?;
        let ledger = SqliteLedger::init(path, &config.store).await?;
        Self::with_sqlite(ledger, config)
    }

    /// Connect to an existing database.
    pub async fn connect(config: &Config) -> Result<Self, LedgerError> {
        let path = database_path(config)?;
        let ledger = SqliteLedger::connect(path, &config.store, false).await?;
        Self::with_sqlite(ledger, config)
    }

    fn with_sqlite(ledger: SqliteLedger, config: &Config) -> Result<Self, LedgerError> {
        let rates: Arc<dyn RateProvider> = match &config.rates_file {
            Some(path) => Arc::new(StaticRates::from_file(path)?),
            None => Arc::new(StaticRates::new(config.default_currency)),
        };
        Ok(Self::new(Arc::new(ledger), rates, config))
    }

    // ========================
    // Wallet operations
    // ========================

    /// Open a zero-balance wallet for a user.
    pub async fn open_wallet(
        &self,
        user_id: UserId,
        currency: Option<Currency>,
        name: Option<String>,
    ) -> Result<Wallet, LedgerError> {
        let mut wallet = Wallet::new(user_id, currency.unwrap_or(self.default_currency));
        if let Some(name) = name {
            wallet = wallet.with_name(name);
        }

        let mut uow = self.ledger.begin().await?;
        uow.insert_wallet(&wallet).await?;
        uow.commit().await?;

        info!(wallet_id = %wallet.id, user_id = %user_id, currency = %wallet.currency, "Wallet opened");
        Ok(wallet)
    }

    /// Get a wallet by id.
    pub async fn wallet(&self, id: WalletId) -> Result<Wallet, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        uow.get_wallet(id).await
    }

    /// Get a user's primary wallet.
    pub async fn wallet_for_user(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        uow.get_wallet_by_user(user_id).await
    }

    /// List every wallet a user holds.
    pub async fn wallets_for_user(&self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        uow.list_wallets_by_user(user_id).await
    }

    /// Freeze or unfreeze a wallet. Inactive wallets take part in no posting.
    pub async fn set_wallet_active(&self, id: WalletId, active: bool) -> Result<Wallet, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        uow.lock_wallets(&[id]).await?;
        uow.set_active(id, active).await?;
        let wallet = uow.get_wallet(id).await?;
        uow.commit().await?;

        info!(wallet_id = %id, active, "Wallet status changed");
        Ok(wallet)
    }

    /// Check that `user_id` owns `wallet_id`.
    pub async fn verify_ownership(
        &self,
        user_id: UserId,
        wallet_id: WalletId,
    ) -> Result<Wallet, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        verify_owner(uow.as_mut(), user_id, wallet_id).await
    }

    // ========================
    // Posting operations
    // ========================

    /// Move funds between two wallets on behalf of the sender's owner.
    pub async fn transfer(&self, req: TransferRequest) -> Result<Transaction, LedgerError> {
        self.orchestrator.transfer(req).await
    }

    /// Privileged credit from outside the ledger.
    pub async fn deposit(&self, req: FundingRequest) -> Result<Transaction, LedgerError> {
        self.orchestrator.deposit(req).await
    }

    /// Privileged debit to outside the ledger.
    pub async fn withdraw(&self, req: FundingRequest) -> Result<Transaction, LedgerError> {
        self.orchestrator.withdraw(req).await
    }

    /// Undo a completed posting with a compensating record.
    pub async fn reverse(
        &self,
        id: TransactionId,
        reference_id: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        self.orchestrator.reverse(id, reference_id).await
    }

    // ========================
    // Currency operations
    // ========================

    /// Convert a wallet to `target` and return the rescaled balance.
    pub async fn convert_wallet_currency(
        &self,
        wallet_id: WalletId,
        target: &str,
    ) -> Result<Money, LedgerError> {
        self.converter.convert(wallet_id, target).await
    }

    /// Convert the user's primary wallet.
    pub async fn convert_user_wallet_currency(
        &self,
        user_id: UserId,
        target: &str,
    ) -> Result<Money, LedgerError> {
        self.converter.convert_for_user(user_id, target).await
    }

    // ========================
    // Query operations
    // ========================

    pub async fn get_history(
        &self,
        user_id: UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<HistoryPage, LedgerError> {
        self.history.history(user_id, limit, offset).await
    }

    pub async fn get_history_in_range(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<HistoryPage, LedgerError> {
        self.history
            .history_in_range(user_id, start, end, limit, offset)
            .await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.history.transaction(id).await
    }

    /// Get a transaction and its reversal, if one was recorded.
    pub async fn get_transaction_info(&self, id: TransactionId) -> Result<TransactionInfo, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        let transaction = uow.get_transaction(id).await?;
        let reversal = uow.find_reversal(id).await?;
        Ok(TransactionInfo {
            transaction,
            reversal,
        })
    }
}

fn database_path(config: &Config) -> Result<&str, LedgerError> {
    Ok(config
        .database
        .to_str()
        .context("Database path is not valid UTF-8")?)
}

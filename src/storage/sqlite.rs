use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Currency, Money, Transaction, TransactionId, TransactionStatus, TransactionType, UserId,
    Wallet, WalletId, now,
};
use crate::error::LedgerError;

use super::{
    DateRange, Ledger, MIGRATION_001_INITIAL, Page, TransactionStore, UnitOfWork, WalletStore,
    ensure_initial,
};

const WALLET_COLUMNS: &str =
    "id, user_id, currency, balance, name, is_active, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, sender_wallet_id, receiver_wallet_id, amount, currency, transaction_type, status, description, reference_id, reverses, made_at, created_at, updated_at";

/// Connection settings for the SQLite ledger.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a writer waits for the database lock before giving up
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_connections: 8,
        }
    }
}

/// SQLite-backed ledger. Each unit of work is one database transaction.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database file, optionally creating it.
    pub async fn connect(path: &str, options: &StoreOptions, create: bool) -> Result<Self> {
        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(path: &str, options: &StoreOptions) -> Result<Self> {
        let ledger = Self::connect(path, options, true).await?;
        ledger.migrate().await?;
        Ok(ledger)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error(e, "Failed to begin unit of work"))?;
        Ok(Box::new(SqliteUnitOfWork { tx }))
    }
}

/// Open database transaction. sqlx rolls it back when dropped uncommitted.
pub struct SqliteUnitOfWork {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl WalletStore for SqliteUnitOfWork {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, currency, balance, name, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(wallet.id.to_string())
        .bind(wallet.user_id.to_string())
        .bind(wallet.currency.as_str())
        .bind(wallet.balance.to_string())
        .bind(&wallet.name)
        .bind(wallet.is_active)
        .bind(encode_timestamp(wallet.created_at))
        .bind(encode_timestamp(wallet.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to save wallet"))?;
        Ok(())
    }

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to fetch wallet"))?;

        match row {
            Some(row) => Ok(Some(row_to_wallet(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_wallet_by_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Wallet>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ? ORDER BY created_at, rowid LIMIT 1"
        ))
        .bind(user_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to fetch wallet by user"))?;

        match row {
            Some(row) => Ok(Some(row_to_wallet(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_wallets_by_user(&mut self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ? ORDER BY created_at, rowid"
        ))
        .bind(user_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to list wallets"))?;

        rows.iter()
            .map(|row| row_to_wallet(row).map_err(LedgerError::from))
            .collect()
    }

    async fn lock_wallets(&mut self, ids: &[WalletId]) -> Result<(), LedgerError> {
        // A write as the first statement takes SQLite's write lock through the
        // busy handler, before any balance is read in this transaction.
        for id in ids {
            sqlx::query("UPDATE wallets SET updated_at = updated_at WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| store_error(e, "Failed to lock wallet"))?;
        }
        debug!(wallets = ids.len(), "wallet rows locked");
        Ok(())
    }

    async fn update_balance(&mut self, id: WalletId, balance: Money) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE wallets SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(balance.to_string())
            .bind(encode_timestamp(now()))
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_error(e, "Failed to update wallet balance"))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_currency(
        &mut self,
        id: WalletId,
        currency: Currency,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE wallets SET currency = ?, updated_at = ? WHERE id = ?")
            .bind(currency.as_str())
            .bind(encode_timestamp(now()))
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_error(e, "Failed to update wallet currency"))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_active(&mut self, id: WalletId, active: bool) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE wallets SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(encode_timestamp(now()))
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_error(e, "Failed to update wallet"))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for SqliteUnitOfWork {
    async fn create_transaction(
        &mut self,
        mut txn: Transaction,
    ) -> Result<Transaction, LedgerError> {
        ensure_initial(&txn)?;
        let recorded_at = now();
        txn.created_at = recorded_at;
        txn.updated_at = recorded_at;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (id, sender_wallet_id, receiver_wallet_id, amount, currency, transaction_type, status, description, reference_id, reverses, made_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(txn.id.to_string())
        .bind(txn.sender_wallet_id.map(|id| id.to_string()))
        .bind(txn.receiver_wallet_id.map(|id| id.to_string()))
        .bind(txn.amount.to_string())
        .bind(txn.currency.as_str())
        .bind(txn.transaction_type.as_str())
        .bind(txn.status.as_str())
        .bind(&txn.description)
        .bind(&txn.reference_id)
        .bind(txn.reverses.map(|id| id.to_string()))
        .bind(encode_timestamp(txn.made_at))
        .bind(encode_timestamp(txn.created_at))
        .bind(encode_timestamp(txn.updated_at))
        .execute(&mut *self.tx)
        .await;

        match inserted {
            Ok(_) => Ok(txn),
            Err(err) => Err(unique_violation(&err, &txn)
                .unwrap_or_else(|| store_error(err, "Failed to save transaction"))),
        }
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to fetch transaction"))?;

        match row {
            Some(row) => Ok(Some(row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference_id = ? AND status <> 'failed'"
        ))
        .bind(reference_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to fetch transaction by reference"))?;

        match row {
            Some(row) => Ok(Some(row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_reversal(
        &mut self,
        original: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reverses = ? AND status <> 'failed'"
        ))
        .bind(original.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to get reversal"))?;

        match row {
            Some(row) => Ok(Some(row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let current = self.get_transaction(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        sqlx::query("UPDATE transactions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(encode_timestamp(now()))
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_error(e, "Failed to update transaction status"))?;
        Ok(())
    }

    async fn list_by_user(
        &mut self,
        user_id: UserId,
        range: Option<DateRange>,
        page: Page,
    ) -> Result<(Vec<Transaction>, i64), LedgerError> {
        let mut filter = String::from(
            "(sender_wallet_id IN (SELECT id FROM wallets WHERE user_id = ?) \
             OR receiver_wallet_id IN (SELECT id FROM wallets WHERE user_id = ?))",
        );
        if range.is_some() {
            filter.push_str(" AND made_at >= ? AND made_at <= ?");
        }

        // Collect all string bindings first so they live long enough
        let user_id_str = user_id.to_string();
        let start_str = range.map(|r| encode_timestamp(r.start));
        let end_str = range.map(|r| encode_timestamp(r.end));

        let count_sql = format!("SELECT COUNT(*) as count FROM transactions WHERE {filter}");
        let mut count_query = sqlx::query(&count_sql).bind(&user_id_str).bind(&user_id_str);
        if let (Some(start), Some(end)) = (&start_str, &end_str) {
            count_query = count_query.bind(start).bind(end);
        }
        let total: i64 = count_query
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| store_error(e, "Failed to count transactions"))?
            .get("count");

        let list_sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE {filter} \
             ORDER BY made_at DESC, created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql).bind(&user_id_str).bind(&user_id_str);
        if let (Some(start), Some(end)) = (&start_str, &end_str) {
            list_query = list_query.bind(start).bind(end);
        }
        let rows = list_query
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| store_error(e, "Failed to list transactions"))?;

        let items = rows
            .iter()
            .map(|row| row_to_transaction(row).map_err(LedgerError::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total))
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| store_error(e, "Failed to commit unit of work"))
    }
}

/// Fixed-width RFC 3339 so text order matches time order.
fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: &str, what: &'static str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid {what} timestamp"))?
        .with_timezone(&Utc))
}

fn decode_optional_id(raw: Option<String>, what: &'static str) -> Result<Option<Uuid>> {
    raw.map(|s| Uuid::parse_str(&s))
        .transpose()
        .with_context(|| format!("Invalid {what} ID"))
}

fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
    let id_str: String = row.get("id");
    let user_id_str: String = row.get("user_id");
    let currency_str: String = row.get("currency");
    let balance_str: String = row.get("balance");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(Wallet {
        id: Uuid::parse_str(&id_str).context("Invalid wallet ID")?,
        user_id: Uuid::parse_str(&user_id_str).context("Invalid user ID")?,
        currency: Currency::parse(&currency_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid wallet currency: {}", currency_str))?,
        balance: Money::parse(&balance_str).context("Invalid wallet balance")?,
        name: row.get("name"),
        is_active: row.get::<i32, _>("is_active") != 0,
        created_at: decode_timestamp(&created_at_str, "created_at")?,
        updated_at: decode_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let id_str: String = row.get("id");
    let amount_str: String = row.get("amount");
    let currency_str: String = row.get("currency");
    let type_str: String = row.get("transaction_type");
    let status_str: String = row.get("status");
    let made_at_str: String = row.get("made_at");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(Transaction {
        id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
        sender_wallet_id: decode_optional_id(row.get("sender_wallet_id"), "sender wallet")?,
        receiver_wallet_id: decode_optional_id(row.get("receiver_wallet_id"), "receiver wallet")?,
        amount: Money::parse(&amount_str).context("Invalid transaction amount")?,
        currency: Currency::parse(&currency_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction currency: {}", currency_str))?,
        transaction_type: TransactionType::parse(&type_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
        status: TransactionStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
        description: row.get("description"),
        reference_id: row.get("reference_id"),
        reverses: decode_optional_id(row.get("reverses"), "reverses")?,
        made_at: decode_timestamp(&made_at_str, "made_at")?,
        created_at: decode_timestamp(&created_at_str, "created_at")?,
        updated_at: decode_timestamp(&updated_at_str, "updated_at")?,
    })
}

/// Translate the unique constraints of the transactions table.
fn unique_violation(err: &sqlx::Error, txn: &Transaction) -> Option<LedgerError> {
    let db_err = err.as_database_error()?;
    if !db_err.is_unique_violation() {
        return None;
    }
    let message = db_err.message();
    if message.contains("reference_id") {
        return Some(LedgerError::DuplicateReference(txn.reference_id.clone()));
    }
    if message.contains("reverses") {
        return txn.reverses.map(LedgerError::AlreadyReversed);
    }
    None
}

/// SQLITE_BUSY / SQLITE_LOCKED (and their extended codes) mean another writer
/// holds the lock; everything else is a plain store failure.
fn store_error(err: sqlx::Error, context: &'static str) -> LedgerError {
    let contended = err
        .as_database_error()
        .and_then(|db_err| db_err.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6));

    if contended {
        debug!(error = %err, "{}: database busy", context);
        return LedgerError::ConcurrencyConflict { attempts: 1 };
    }
    LedgerError::Store(anyhow::Error::new(err).context(context))
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ExecutionPolicy;
use crate::domain::{Currency, Money, UserId, Wallet, WalletId};
use crate::error::LedgerError;
use crate::rates::{RatePair, RateProvider};
use crate::storage::Ledger;

/// Relabels a wallet in another currency and rescales its balance.
/// No transaction record is written.
pub struct CurrencyConverter {
    ledger: Arc<dyn Ledger>,
    rates: Arc<dyn RateProvider>,
    rate_timeout: Duration,
    policy: ExecutionPolicy,
}

impl CurrencyConverter {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        rates: Arc<dyn RateProvider>,
        rate_timeout: Duration,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            ledger,
            rates,
            rate_timeout,
            policy,
        }
    }

    /// Convert a wallet and return its new balance.
    pub async fn convert(&self, wallet_id: WalletId, target: &str) -> Result<Money, LedgerError> {
        let target = parse_target(target)?;
        self.run(wallet_id, target).await
    }

    /// Convert the user's primary wallet.
    pub async fn convert_for_user(&self, user_id: UserId, target: &str) -> Result<Money, LedgerError> {
        let target = parse_target(target)?;
        let wallet = {
            let mut uow = self.ledger.begin().await?;
            uow.get_wallet_by_user(user_id).await?
        };
        self.run(wallet.id, target).await
    }

    async fn run(&self, wallet_id: WalletId, target: Currency) -> Result<Money, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(wallet_id, target).await {
                Err(LedgerError::ConcurrencyConflict { .. }) if attempt < self.policy.max_attempts => {
                    warn!(wallet_id = %wallet_id, attempt, "Conversion raced a wallet update, retrying");
                    tokio::time::sleep(self.policy.retry_backoff * attempt).await;
                }
                Err(LedgerError::ConcurrencyConflict { .. }) => {
                    return Err(LedgerError::ConcurrencyConflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    async fn attempt(&self, wallet_id: WalletId, target: Currency) -> Result<Money, LedgerError> {
        // Snapshot without holding a lock across the rate call.
        let snapshot = {
            let mut uow = self.ledger.begin().await?;
            uow.get_wallet(wallet_id).await?
        };
        ensure_active(&snapshot)?;

        let pair = self.fetch_rates(snapshot.currency, target).await?;

        let update = async {
            let mut uow = self.ledger.begin().await?;
            uow.lock_wallets(&[wallet_id]).await?;
            let wallet = uow.get_wallet(wallet_id).await?;
            if wallet.currency != snapshot.currency {
                // Converted by someone else while the rates were in flight
                return Err(LedgerError::ConcurrencyConflict { attempts: 1 });
            }
            ensure_active(&wallet)?;

            let balance = wallet.balance.convert(pair.source, pair.target)?;
            uow.update_balance(wallet_id, balance).await?;
            uow.update_currency(wallet_id, target).await?;
            uow.commit().await?;

            info!(
                wallet_id = %wallet_id,
                from = %wallet.currency,
                to = %target,
                old_balance = %wallet.balance,
                new_balance = %balance,
                "Wallet currency converted"
            );
            Ok::<_, LedgerError>(balance)
        };

        tokio::time::timeout(self.policy.timeout, update)
            .await
            .unwrap_or(Err(LedgerError::TimedOut(self.policy.timeout)))
    }

    async fn fetch_rates(&self, source: Currency, target: Currency) -> Result<RatePair, LedgerError> {
        match tokio::time::timeout(self.rate_timeout, self.rates.rates(source, target)).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(err)) => {
                warn!(%source, %target, error = %err, "Rate provider failed");
                Err(LedgerError::RateUnavailable(format!("{err:#}")))
            }
            Err(_) => {
                warn!(%source, %target, timeout = ?self.rate_timeout, "Rate provider timed out");
                Err(LedgerError::RateUnavailable(format!(
                    "rate provider timed out after {:?}",
                    self.rate_timeout
                )))
            }
        }
    }
}

fn parse_target(code: &str) -> Result<Currency, LedgerError> {
    Currency::parse(code).ok_or_else(|| LedgerError::InvalidCurrency(code.to_string()))
}

fn ensure_active(wallet: &Wallet) -> Result<(), LedgerError> {
    if !wallet.is_active {
        return Err(LedgerError::WalletInactive(wallet.id));
    }
    Ok(())
}

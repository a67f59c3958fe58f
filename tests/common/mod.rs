// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use pockets::application::{FundingRequest, LedgerService};
use pockets::config::Config;
use pockets::domain::{Currency, Money, Rate, Wallet};
use pockets::rates::{RateProvider, StaticRates};
use pockets::storage::SqliteLedger;
use tempfile::TempDir;
use uuid::Uuid;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with_rates(Arc::new(test_rates())).await
}

/// Same as `test_service`, with a custom rate provider
pub async fn test_service_with_rates(
    rates: Arc<dyn RateProvider>,
) -> Result<(LedgerService, TempDir)> {
    test_service_with(rates, |_| {}).await
}

/// Custom rate provider and configuration tweaks
pub async fn test_service_with(
    rates: Arc<dyn RateProvider>,
    configure: impl FnOnce(&mut Config),
) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let mut config = test_config(&temp_dir);
    configure(&mut config);
    let ledger = SqliteLedger::init(config.database.to_str().unwrap(), &config.store).await?;
    let service = LedgerService::new(Arc::new(ledger), rates, &config);
    Ok((service, temp_dir))
}

pub fn test_config(temp_dir: &TempDir) -> Config {
    Config::default().with_database(temp_dir.path().join("test.db"))
}

/// EUR-based table: 1 EUR = 1.08 USD = 1650 NGN
pub fn test_rates() -> StaticRates {
    StaticRates::new(Currency::EUR)
        .with_rate(Currency::USD, Rate::parse("1.08").unwrap())
        .with_rate(Currency::NGN, Rate::parse("1650").unwrap())
}

pub fn money(raw: &str) -> Money {
    Money::parse(raw).unwrap()
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Open an NGN wallet for a fresh user and deposit `balance` into it.
pub async fn funded_wallet(service: &LedgerService, balance: &str) -> Result<Wallet> {
    let wallet = service.open_wallet(Uuid::new_v4(), None, None).await?;
    let amount = money(balance);
    if amount.is_positive() {
        service
            .deposit(FundingRequest::new(wallet.id, amount, wallet.currency))
            .await?;
    }
    Ok(service.wallet(wallet.id).await?)
}

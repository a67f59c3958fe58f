//! Exchange-rate sources for wallet currency conversion.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{Currency, Rate};

/// Units of each currency per one unit of a shared base currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePair {
    pub source: Rate,
    pub target: Rate,
}

/// Supplies exchange rates. Implementations may be slow or fail; the
/// converter bounds every call with its own timeout.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn rates(&self, source: Currency, target: Currency) -> Result<RatePair>;
}

#[derive(Debug, Deserialize)]
struct RateTable {
    base: Currency,
    rates: HashMap<Currency, Rate>,
}

/// Fixed rate table relative to a base currency, e.g.
/// `{"base": "EUR", "rates": {"USD": 1.08, "NGN": "1650.00"}}`.
#[derive(Debug, Clone)]
pub struct StaticRates {
    base: Currency,
    rates: HashMap<Currency, Rate>,
}

impl StaticRates {
    pub fn new(base: Currency) -> Self {
        Self {
            base,
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: Currency, rate: Rate) -> Self {
        self.rates.insert(currency, rate);
        self
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let table: RateTable = serde_json::from_str(raw).context("Failed to parse rate table")?;
        Ok(Self {
            base: table.base,
            rates: table.rates,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rate table {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn base(&self) -> Currency {
        self.base
    }

    fn rate(&self, currency: Currency) -> Result<Rate> {
        if currency == self.base {
            return Ok(Rate::ONE);
        }
        self.rates
            .get(&currency)
            .copied()
            .ok_or_else(|| anyhow!("no rate for {} against {}", currency, self.base))
    }
}

#[async_trait]
impl RateProvider for StaticRates {
    async fn rates(&self, source: Currency, target: Currency) -> Result<RatePair> {
        Ok(RatePair {
            source: self.rate(source)?,
            target: self.rate(target)?,
        })
    }
}

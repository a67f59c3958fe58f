use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;

use crate::domain::Currency;
use crate::storage::StoreOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("unknown log format {other:?} (expected text or json)"),
        }
    }
}

/// Retry and deadline settings for one ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Upper bound for a single unit of work
    pub timeout: Duration,
    /// Total attempts when the store reports a lock conflict
    pub max_attempts: u32,
    /// Linear backoff step between attempts
    pub retry_backoff: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    pub default_currency: Currency,
    pub execution: ExecutionPolicy,
    pub rate_timeout: Duration,
    pub store: StoreOptions,
    pub rates_file: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("pockets.db"),
            default_currency: Currency::NGN,
            execution: ExecutionPolicy::default(),
            rate_timeout: Duration::from_millis(3000),
            store: StoreOptions::default(),
            rates_file: None,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        let defaults = Config::default();
        let config = Config {
            database: env::var("POCKETS_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database),
            default_currency: match env::var("POCKETS_DEFAULT_CURRENCY") {
                Ok(code) => Currency::parse(&code)
                    .with_context(|| format!("POCKETS_DEFAULT_CURRENCY: invalid code {code:?}"))?,
                Err(_) => defaults.default_currency,
            },
            execution: ExecutionPolicy {
                timeout: millis_or("POCKETS_TRANSFER_TIMEOUT_MS", defaults.execution.timeout)?,
                max_attempts: env_or("POCKETS_MAX_ATTEMPTS", defaults.execution.max_attempts)?,
                retry_backoff: millis_or(
                    "POCKETS_RETRY_BACKOFF_MS",
                    defaults.execution.retry_backoff,
                )?,
            },
            rate_timeout: millis_or("POCKETS_RATE_TIMEOUT_MS", defaults.rate_timeout)?,
            store: StoreOptions {
                busy_timeout: millis_or("POCKETS_BUSY_TIMEOUT_MS", defaults.store.busy_timeout)?,
                max_connections: env_or(
                    "POCKETS_MAX_CONNECTIONS",
                    defaults.store.max_connections,
                )?,
            },
            rates_file: env::var("POCKETS_RATES_FILE").ok().map(PathBuf::from),
            log_format: env_or("POCKETS_LOG_FORMAT", defaults.log_format)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = path.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution.max_attempts == 0 {
            bail!("POCKETS_MAX_ATTEMPTS must be at least 1");
        }
        if self.execution.timeout.is_zero() {
            bail!("POCKETS_TRANSFER_TIMEOUT_MS must be greater than zero");
        }
        if self.store.max_connections == 0 {
            bail!("POCKETS_MAX_CONNECTIONS must be at least 1");
        }
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn millis_or(key: &str, default: Duration) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_or(key, default_ms).map(Duration::from_millis)
}

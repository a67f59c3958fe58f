pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod rates;
pub mod storage;

pub use domain::*;
pub use error::LedgerError;
pub use storage::{Ledger, MemoryLedger, SqliteLedger};

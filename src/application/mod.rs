// Application layer - use cases and orchestration over the storage traits

pub mod convert;
pub mod history;
pub mod ownership;
pub mod service;
pub mod transfer;

pub use convert::CurrencyConverter;
pub use history::{HistoryPage, HistoryQuery};
pub use ownership::{ensure_owner, verify_owner};
pub use service::{LedgerService, TransactionInfo};
pub use transfer::{FundingRequest, TransferOrchestrator, TransferRequest};

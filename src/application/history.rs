use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Transaction, TransactionId, UserId};
use crate::error::LedgerError;
use crate::storage::{DateRange, Ledger, Page};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// One page of a user's history plus the match count before paging.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub items: Vec<Transaction>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Clamp caller-supplied paging: negatives become zero, missing values take
/// the defaults, oversized pages are capped.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> Page {
    Page {
        limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(0, MAX_PAGE_SIZE),
        offset: offset.unwrap_or(0).max(0),
    }
}

/// Read-only queries over transaction records.
pub struct HistoryQuery {
    ledger: Arc<dyn Ledger>,
}

impl HistoryQuery {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn history(
        &self,
        user_id: UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<HistoryPage, LedgerError> {
        self.list(user_id, None, page(limit, offset)).await
    }

    /// Records whose occurrence time falls in `[start, end]`.
    pub async fn history_in_range(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<HistoryPage, LedgerError> {
        let range = DateRange::new(start, end)?;
        self.list(user_id, Some(range), page(limit, offset)).await
    }

    pub async fn transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        uow.get_transaction(id).await
    }

    async fn list(
        &self,
        user_id: UserId,
        range: Option<DateRange>,
        page: Page,
    ) -> Result<HistoryPage, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        let (items, total) = uow.list_by_user(user_id, range, page).await?;
        Ok(HistoryPage {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }
}

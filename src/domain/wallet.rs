use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, Money, now};

pub type WalletId = Uuid;
pub type UserId = Uuid;

/// Name given to a wallet opened without one.
pub const DEFAULT_WALLET_NAME: &str = "Naira Wallet";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    /// Owning user
    pub user_id: UserId,
    pub currency: Currency,
    /// Never negative once persisted
    pub balance: Money,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A freshly opened wallet: zero balance, active.
    pub fn new(user_id: UserId, currency: Currency) -> Self {
        let created_at = now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            currency,
            balance: Money::ZERO,
            name: DEFAULT_WALLET_NAME.to_string(),
            is_active: true,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_starts_empty_and_active() {
        let user = Uuid::new_v4();
        let wallet = Wallet::new(user, Currency::NGN);
        assert_eq!(wallet.balance, Money::ZERO);
        assert_eq!(wallet.balance.to_string(), "0.00");
        assert!(wallet.is_active);
        assert_eq!(wallet.name, DEFAULT_WALLET_NAME);
        assert_eq!(wallet.created_at, wallet.updated_at);
    }

    #[test]
    fn test_ownership() {
        let owner = Uuid::new_v4();
        let wallet = Wallet::new(owner, Currency::USD).with_name("Dollar Wallet");
        assert!(wallet.is_owned_by(owner));
        assert!(!wallet.is_owned_by(Uuid::new_v4()));
        assert_eq!(wallet.name, "Dollar Wallet");
    }
}

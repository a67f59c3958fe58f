use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, Money, UserId, WalletId, now};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Deposit,
    Withdrawal,
    Payment,
    Fee,
    Refund,
    Chargeback,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "transfer",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Payment => "payment",
            TransactionType::Fee => "fee",
            TransactionType::Refund => "refund",
            TransactionType::Chargeback => "chargeback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(TransactionType::Transfer),
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" => Some(TransactionType::Withdrawal),
            "payment" => Some(TransactionType::Payment),
            "fee" => Some(TransactionType::Fee),
            "refund" => Some(TransactionType::Refund),
            "chargeback" => Some(TransactionType::Chargeback),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
    Refunded,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "reversed" => Some(TransactionStatus::Reversed),
            "refunded" => Some(TransactionStatus::Refunded),
            "cancelled" => Some(TransactionStatus::Cancelled),
            _ => None,
        }
    }

    /// Every status except `pending` is final. Compensating records are born
    /// pending and closed as `reversed`/`refunded`; originals are never reopened.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == TransactionStatus::Pending && next != TransactionStatus::Pending
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger record of money moving into, out of, or between wallets.
/// Only `status` (and `updated_at`) ever change after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Debited wallet; None for deposits
    pub sender_wallet_id: Option<WalletId>,
    /// Credited wallet; None for withdrawals
    pub receiver_wallet_id: Option<WalletId>,
    /// Always positive
    pub amount: Money,
    pub currency: Currency,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    /// Idempotency key, globally unique
    pub reference_id: String,
    /// Set on compensating entries, points to the original record
    pub reverses: Option<TransactionId>,
    /// When the movement happened in the real world
    pub made_at: DateTime<Utc>,
    /// When the record was inserted
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A pending record. Reference id and timestamps may be replaced before insertion.
    pub fn new(transaction_type: TransactionType, amount: Money, currency: Currency) -> Self {
        let created_at = now();
        Self {
            id: Uuid::new_v4(),
            sender_wallet_id: None,
            receiver_wallet_id: None,
            amount,
            currency,
            transaction_type,
            status: TransactionStatus::Pending,
            description: String::new(),
            reference_id: generate_reference_id(),
            reverses: None,
            made_at: created_at,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_sender(mut self, wallet_id: WalletId) -> Self {
        self.sender_wallet_id = Some(wallet_id);
        self
    }

    pub fn with_receiver(mut self, wallet_id: WalletId) -> Self {
        self.receiver_wallet_id = Some(wallet_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = reference_id.into();
        self
    }

    pub fn with_reverses(mut self, original_id: TransactionId) -> Self {
        self.reverses = Some(original_id);
        self
    }

    pub fn with_made_at(mut self, made_at: DateTime<Utc>) -> Self {
        self.made_at = made_at;
        self
    }

    /// True if either side of the record is one of `wallets`.
    pub fn touches_any(&self, wallets: &[WalletId]) -> bool {
        [self.sender_wallet_id, self.receiver_wallet_id]
            .into_iter()
            .flatten()
            .any(|id| wallets.contains(&id))
    }
}

/// Example: `Txn_1718000000_6f1c...`
pub fn generate_reference_id() -> String {
    format!("Txn_{}_{}", Utc::now().timestamp(), Uuid::new_v4())
}

/// Description used when the caller supplies none, naming both parties by
/// the first eight characters of their user ids.
pub fn default_transfer_description(sender: UserId, receiver: UserId) -> String {
    format!(
        "Transfer from {} to {}",
        &sender.to_string()[..8],
        &receiver.to_string()[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_and_status_roundtrip() {
        for t in [
            TransactionType::Transfer,
            TransactionType::Deposit,
            TransactionType::Withdrawal,
            TransactionType::Payment,
            TransactionType::Fee,
            TransactionType::Refund,
            TransactionType::Chargeback,
        ] {
            assert_eq!(TransactionType::parse(t.as_str()), Some(t));
        }
        for s in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Reversed,
            TransactionStatus::Refunded,
            TransactionStatus::Cancelled,
        ] {
            assert_eq!(TransactionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TransactionStatus::parse("COMPLETED"), None);
    }

    #[test]
    fn test_status_transitions_are_one_way() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Reversed));
        assert!(!Pending.can_transition_to(Pending));

        for terminal in [Completed, Failed, Cancelled, Reversed, Refunded] {
            assert!(terminal.is_terminal());
            for next in [Pending, Completed, Failed, Cancelled, Reversed, Refunded] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_new_transfer_is_pending_with_reference() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let txn = Transaction::new(TransactionType::Transfer, Money::from_cents(4000), Currency::NGN)
            .with_sender(a)
            .with_receiver(b)
            .with_description("rent");

        assert_eq!(txn.status, TransactionStatus::Pending);
        assert_eq!(txn.transaction_type, TransactionType::Transfer);
        assert_eq!(txn.sender_wallet_id, Some(a));
        assert_eq!(txn.receiver_wallet_id, Some(b));
        assert!(txn.reference_id.starts_with("Txn_"));
        assert!(txn.touches_any(&[b]));
        assert!(!txn.touches_any(&[Uuid::new_v4()]));
        assert_eq!(txn.reverses, None);
    }

    #[test]
    fn test_reference_ids_are_unique() {
        assert_ne!(generate_reference_id(), generate_reference_id());
    }

    #[test]
    fn test_default_description_names_both_parties() {
        let sender = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        let receiver = Uuid::parse_str("e5f6a7b8-0000-4000-8000-000000000000").unwrap();
        assert_eq!(
            default_transfer_description(sender, receiver),
            "Transfer from a1b2c3d4 to e5f6a7b8"
        );
    }
}

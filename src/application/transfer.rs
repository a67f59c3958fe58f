//! Transfer Orchestrator
//!
//! Drives every balance-changing posting (transfer, deposit, withdrawal,
//! reversal) through the [`TransferState`] machine inside one unit of work.
//! Wallet rows are locked in ascending id order before any balance is read,
//! so the balance used for the funds check is the one the debit is written
//! against.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::ownership::ensure_owner;
use crate::config::ExecutionPolicy;
use crate::domain::{
    Currency, Money, Transaction, TransactionId, TransactionStatus, TransactionType,
    TransferState, UserId, Wallet, WalletId, default_transfer_description,
    generate_reference_id, now,
};
use crate::error::LedgerError;
use crate::storage::{Ledger, UnitOfWork};

/// A user-initiated move between two wallets.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub actor: UserId,
    pub sender: WalletId,
    pub receiver: WalletId,
    pub amount: Money,
    pub currency: Currency,
    pub description: Option<String>,
    /// Idempotency key; generated when absent
    pub reference_id: Option<String>,
    /// Occurrence time; defaults to now
    pub made_at: Option<DateTime<Utc>>,
}

impl TransferRequest {
    pub fn new(
        actor: UserId,
        sender: WalletId,
        receiver: WalletId,
        amount: Money,
        currency: Currency,
    ) -> Self {
        Self {
            actor,
            sender,
            receiver,
            amount,
            currency,
            description: None,
            reference_id: None,
            made_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_made_at(mut self, made_at: DateTime<Utc>) -> Self {
        self.made_at = Some(made_at);
        self
    }
}

/// A privileged one-sided posting (deposit or withdrawal). No actor check.
#[derive(Debug, Clone)]
pub struct FundingRequest {
    pub wallet: WalletId,
    pub amount: Money,
    pub currency: Currency,
    pub description: Option<String>,
    pub reference_id: Option<String>,
    pub made_at: Option<DateTime<Utc>>,
}

impl FundingRequest {
    pub fn new(wallet: WalletId, amount: Money, currency: Currency) -> Self {
        Self {
            wallet,
            amount,
            currency,
            description: None,
            reference_id: None,
            made_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_made_at(mut self, made_at: DateTime<Utc>) -> Self {
        self.made_at = Some(made_at);
        self
    }
}

/// Everything the state machine needs, whatever kind of request produced it.
#[derive(Debug, Clone)]
struct Posting {
    kind: TransactionType,
    debit: Option<WalletId>,
    credit: Option<WalletId>,
    amount: Money,
    currency: Currency,
    /// Must own the debit wallet when set
    actor: Option<UserId>,
    description: Option<String>,
    reference_id: String,
    reverses: Option<TransactionId>,
    final_status: TransactionStatus,
    made_at: DateTime<Utc>,
}

impl Posting {
    /// Lock order: ascending wallet id.
    fn lock_set(&self) -> Vec<WalletId> {
        let mut ids: Vec<WalletId> = [self.debit, self.credit].into_iter().flatten().collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn record(&self, description: String) -> Transaction {
        let mut txn = Transaction::new(self.kind, self.amount, self.currency)
            .with_reference(self.reference_id.clone())
            .with_made_at(self.made_at)
            .with_description(description);
        if let Some(wallet) = self.debit {
            txn = txn.with_sender(wallet);
        }
        if let Some(wallet) = self.credit {
            txn = txn.with_receiver(wallet);
        }
        if let Some(original) = self.reverses {
            txn = txn.with_reverses(original);
        }
        txn
    }

    /// Whether an existing record is this same posting submitted earlier.
    fn is_replay_of(&self, existing: &Transaction) -> bool {
        existing.transaction_type == self.kind
            && existing.sender_wallet_id == self.debit
            && existing.receiver_wallet_id == self.credit
            && existing.amount == self.amount
            && existing.currency == self.currency
            && existing.reverses == self.reverses
    }
}

/// Runs postings atomically with bounded time and retries on lock conflicts.
pub struct TransferOrchestrator {
    ledger: Arc<dyn Ledger>,
    policy: ExecutionPolicy,
}

impl TransferOrchestrator {
    pub fn new(ledger: Arc<dyn Ledger>, policy: ExecutionPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Move `amount` from the actor's wallet to another wallet.
    pub async fn transfer(&self, req: TransferRequest) -> Result<Transaction, LedgerError> {
        ensure_positive(req.amount)?;
        if req.sender == req.receiver {
            return Err(LedgerError::SameWallet(req.sender));
        }
        let posting = Posting {
            kind: TransactionType::Transfer,
            debit: Some(req.sender),
            credit: Some(req.receiver),
            amount: req.amount,
            currency: req.currency,
            actor: Some(req.actor),
            description: req.description,
            reference_id: req.reference_id.unwrap_or_else(generate_reference_id),
            reverses: None,
            final_status: TransactionStatus::Completed,
            made_at: req.made_at.unwrap_or_else(now),
        };
        self.run(posting).await
    }

    /// Credit a wallet from outside the ledger.
    pub async fn deposit(&self, req: FundingRequest) -> Result<Transaction, LedgerError> {
        ensure_positive(req.amount)?;
        let posting = Self::funding(TransactionType::Deposit, None, Some(req.wallet), req);
        self.run(posting).await
    }

    /// Debit a wallet to outside the ledger.
    pub async fn withdraw(&self, req: FundingRequest) -> Result<Transaction, LedgerError> {
        ensure_positive(req.amount)?;
        let posting = Self::funding(TransactionType::Withdrawal, Some(req.wallet), None, req);
        self.run(posting).await
    }

    /// Append a compensating `refund` record that moves a completed posting's
    /// amount back. The original record is left untouched.
    pub async fn reverse(
        &self,
        original_id: TransactionId,
        reference_id: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let original = {
            let mut uow = self.ledger.begin().await?;
            uow.get_transaction(original_id).await?
        };

        let posting = Posting {
            kind: TransactionType::Refund,
            debit: original.receiver_wallet_id,
            credit: original.sender_wallet_id,
            amount: original.amount,
            currency: original.currency,
            actor: None,
            description: Some(format!("Reversal of {}", original.reference_id)),
            reference_id: reference_id.unwrap_or_else(generate_reference_id),
            reverses: Some(original.id),
            final_status: TransactionStatus::Reversed,
            made_at: now(),
        };
        self.run(posting).await
    }

    fn funding(
        kind: TransactionType,
        debit: Option<WalletId>,
        credit: Option<WalletId>,
        req: FundingRequest,
    ) -> Posting {
        Posting {
            kind,
            debit,
            credit,
            amount: req.amount,
            currency: req.currency,
            actor: None,
            description: req.description,
            reference_id: req.reference_id.unwrap_or_else(generate_reference_id),
            reverses: None,
            final_status: TransactionStatus::Completed,
            made_at: req.made_at.unwrap_or_else(now),
        }
    }

    async fn run(&self, posting: Posting) -> Result<Transaction, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut state = TransferState::Initiated;
            let outcome =
                tokio::time::timeout(self.policy.timeout, self.execute(&posting, &mut state))
                    .await
                    .unwrap_or(Err(LedgerError::TimedOut(self.policy.timeout)));

            let err = match outcome {
                Ok(txn) => return Ok(txn),
                Err(err) => err,
            };

            if let LedgerError::ConcurrencyConflict { .. } = err {
                if attempt < self.policy.max_attempts {
                    warn!(
                        reference_id = %posting.reference_id,
                        attempt,
                        state = %state,
                        "Posting hit a lock conflict, retrying"
                    );
                    tokio::time::sleep(self.policy.retry_backoff * attempt).await;
                    continue;
                }
            }

            if let LedgerError::TimedOut(_) = err {
                if let Some(txn) = self.landed(&posting).await {
                    return Ok(txn);
                }
            }

            let left = state.fail();
            if left.is_past_validation() {
                self.record_failure(&posting).await;
            }

            let err = match err {
                LedgerError::ConcurrencyConflict { .. } => {
                    LedgerError::ConcurrencyConflict { attempts: attempt }
                }
                other => other,
            };
            if err.is_rejection() {
                warn!(
                    reference_id = %posting.reference_id,
                    kind = %posting.kind,
                    error = %err,
                    "Posting rejected"
                );
            } else {
                error!(
                    reference_id = %posting.reference_id,
                    kind = %posting.kind,
                    state = %left,
                    error = %err,
                    "Posting failed"
                );
            }
            return Err(err);
        }
    }

    /// One attempt. `state` is left at the last step reached so the caller
    /// can tell whether a pending record was written before the failure.
    async fn execute(
        &self,
        posting: &Posting,
        state: &mut TransferState,
    ) -> Result<Transaction, LedgerError> {
        let mut uow = self.ledger.begin().await?;
        uow.lock_wallets(&posting.lock_set()).await?;

        // Canonical read: under lock, immediately before the writes.
        let debit = load(uow.as_mut(), posting.debit).await?;
        let credit = load(uow.as_mut(), posting.credit).await?;

        if let (Some(actor), Some(debit)) = (posting.actor, &debit) {
            ensure_owner(debit, actor)?;
        }

        if let Some(existing) = uow.find_by_reference(&posting.reference_id).await? {
            if posting.is_replay_of(&existing) && existing.status == posting.final_status {
                info!(
                    reference_id = %existing.reference_id,
                    transaction_id = %existing.id,
                    "Replayed posting, returning existing record"
                );
                *state = TransferState::Completed;
                return Ok(existing);
            }
            return Err(LedgerError::DuplicateReference(posting.reference_id.clone()));
        }

        for wallet in [&debit, &credit].into_iter().flatten() {
            if !wallet.is_active {
                return Err(LedgerError::WalletInactive(wallet.id));
            }
            if wallet.currency != posting.currency {
                return Err(LedgerError::CurrencyMismatch {
                    expected: wallet.currency,
                    actual: posting.currency,
                });
            }
        }

        if let Some(original_id) = posting.reverses {
            let original = uow.get_transaction(original_id).await?;
            if original.status != TransactionStatus::Completed {
                return Err(LedgerError::InvalidTransition {
                    from: original.status,
                    to: TransactionStatus::Reversed,
                });
            }
            if uow.find_reversal(original_id).await?.is_some() {
                return Err(LedgerError::AlreadyReversed(original_id));
            }
        }

        let debited = match &debit {
            Some(wallet) => {
                let remaining = wallet.balance.checked_sub(posting.amount)?;
                if remaining.is_negative() {
                    return Err(LedgerError::InsufficientFunds {
                        wallet: wallet.id,
                        balance: wallet.balance,
                        required: posting.amount,
                    });
                }
                Some((wallet.id, remaining))
            }
            None => None,
        };
        let credited = match &credit {
            Some(wallet) => Some((wallet.id, wallet.balance.checked_add(posting.amount)?)),
            None => None,
        };

        state.advance();
        debug!(reference_id = %posting.reference_id, state = %state, "Posting validated");

        let description = match (&posting.description, &debit, &credit) {
            (Some(description), _, _) => description.clone(),
            (None, Some(from), Some(to)) => default_transfer_description(from.user_id, to.user_id),
            (None, _, _) => posting.kind.to_string(),
        };
        let txn = uow.create_transaction(posting.record(description)).await?;

        if let Some((id, balance)) = debited {
            uow.update_balance(id, balance).await?;
        }
        state.advance();

        if let Some((id, balance)) = credited {
            uow.update_balance(id, balance).await?;
        }
        state.advance();

        uow.update_status(txn.id, posting.final_status).await?;
        let txn = uow.get_transaction(txn.id).await?;
        state.advance();

        uow.commit().await?;
        state.advance();

        info!(
            transaction_id = %txn.id,
            reference_id = %txn.reference_id,
            kind = %txn.transaction_type,
            amount = %txn.amount,
            currency = %txn.currency,
            "Posting completed"
        );

        Ok(txn)
    }

    /// The deadline can fire while a commit is in flight. Returns the
    /// posting's record if that commit landed after all.
    async fn landed(&self, posting: &Posting) -> Option<Transaction> {
        let lookup = async {
            let mut uow = self.ledger.begin().await?;
            uow.find_by_reference(&posting.reference_id).await
        };

        match tokio::time::timeout(self.policy.timeout, lookup).await {
            Ok(Ok(Some(txn)))
                if posting.is_replay_of(&txn) && txn.status == posting.final_status =>
            {
                info!(
                    transaction_id = %txn.id,
                    reference_id = %txn.reference_id,
                    "Posting committed before its deadline was observed"
                );
                Some(txn)
            }
            Ok(Ok(_)) => None,
            Ok(Err(err)) => {
                warn!(
                    reference_id = %posting.reference_id,
                    error = %err,
                    "Could not check for a landed commit after timeout"
                );
                None
            }
            Err(_) => None,
        }
    }

    /// Leave a `failed` record behind once a posting that got past validation
    /// was rolled back. Best effort: the original error is what the caller sees.
    async fn record_failure(&self, posting: &Posting) {
        let description = posting
            .description
            .clone()
            .unwrap_or_else(|| posting.kind.to_string());

        let result = async {
            let mut uow = self.ledger.begin().await?;
            let txn = uow.create_transaction(posting.record(description)).await?;
            uow.update_status(txn.id, TransactionStatus::Failed).await?;
            uow.commit().await
        };

        match tokio::time::timeout(self.policy.timeout, result).await {
            Ok(Ok(())) => {
                warn!(reference_id = %posting.reference_id, "Recorded failed posting");
            }
            Ok(Err(LedgerError::DuplicateReference(_))) => {
                debug!(
                    reference_id = %posting.reference_id,
                    "A live record holds the reference, no failed record written"
                );
            }
            Ok(Err(err)) => {
                error!(
                    reference_id = %posting.reference_id,
                    error = %err,
                    "Failed to record failed posting"
                );
            }
            Err(_) => {
                error!(
                    reference_id = %posting.reference_id,
                    "Timed out recording failed posting"
                );
            }
        }
    }
}

fn ensure_positive(amount: Money) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

async fn load(
    uow: &mut dyn UnitOfWork,
    id: Option<WalletId>,
) -> Result<Option<Wallet>, LedgerError> {
    match id {
        Some(id) => Ok(Some(uow.get_wallet(id).await?)),
        None => Ok(None),
    }
}

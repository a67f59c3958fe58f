mod common;

use anyhow::Result;
use common::{funded_wallet, money, parse_date, test_service};
use pockets::LedgerError;
use pockets::application::{FundingRequest, TransferRequest};
use pockets::domain::{Currency, TransactionStatus, TransactionType};
use uuid::Uuid;

#[tokio::test]
async fn test_transfer_moves_funds() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "100.00").await?;
    let b = funded_wallet(&service, "0.00").await?;

    let txn = service
        .transfer(TransferRequest::new(
            a.user_id,
            a.id,
            b.id,
            money("40.00"),
            Currency::NGN,
        ))
        .await?;

    assert_eq!(txn.status, TransactionStatus::Completed);
    assert_eq!(txn.amount, money("40.00"));
    assert_eq!(service.wallet(a.id).await?.balance, money("60.00"));
    assert_eq!(service.wallet(b.id).await?.balance, money("40.00"));

    // The stored record matches what the caller got back
    let stored = service.get_transaction(txn.id).await?;
    assert_eq!(stored, txn);
    assert_eq!(stored.amount.to_string(), "40.00");

    Ok(())
}

#[tokio::test]
async fn test_conservation_across_transfers() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "250.75").await?;
    let b = funded_wallet(&service, "19.25").await?;

    for (amount, forward) in [("0.01", true), ("100.00", true), ("33.33", false), ("12.50", true)] {
        let (from, to) = if forward { (&a, &b) } else { (&b, &a) };
        service
            .transfer(TransferRequest::new(
                from.user_id,
                from.id,
                to.id,
                money(amount),
                Currency::NGN,
            ))
            .await?;
    }

    let total = service
        .wallet(a.id)
        .await?
        .balance
        .checked_add(service.wallet(b.id).await?.balance)?;
    assert_eq!(total, money("270.00"));
    assert_eq!(service.wallet(a.id).await?.balance, money("171.57"));

    Ok(())
}

#[tokio::test]
async fn test_insufficient_funds_changes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "30.00").await?;
    let b = funded_wallet(&service, "5.00").await?;

    let err = service
        .transfer(TransferRequest::new(
            a.user_id,
            a.id,
            b.id,
            money("30.01"),
            Currency::NGN,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    assert_eq!(service.wallet(a.id).await?.balance, money("30.00"));
    assert_eq!(service.wallet(b.id).await?.balance, money("5.00"));
    // Only the funding deposit exists
    assert_eq!(service.get_history(a.user_id, None, None).await?.total, 1);

    Ok(())
}

#[tokio::test]
async fn test_stranger_cannot_debit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "50.00").await?;
    let b = funded_wallet(&service, "0.00").await?;

    let err = service
        .transfer(TransferRequest::new(
            b.user_id,
            a.id,
            b.id,
            money("10.00"),
            Currency::NGN,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotOwner { user, wallet } if user == b.user_id && wallet == a.id));
    assert_eq!(service.wallet(a.id).await?.balance, money("50.00"));

    assert!(service.verify_ownership(a.user_id, a.id).await.is_ok());
    assert!(matches!(
        service.verify_ownership(b.user_id, a.id).await,
        Err(LedgerError::NotOwner { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_missing_wallet() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "50.00").await?;

    let err = service
        .transfer(TransferRequest::new(
            a.user_id,
            a.id,
            Uuid::new_v4(),
            money("10.00"),
            Currency::NGN,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(_)));
    assert_eq!(service.wallet(a.id).await?.balance, money("50.00"));

    Ok(())
}

#[tokio::test]
async fn test_invalid_amounts_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "50.00").await?;
    let b = funded_wallet(&service, "0.00").await?;

    for amount in ["0.00", "-5.00"] {
        let err = service
            .transfer(TransferRequest::new(
                a.user_id,
                a.id,
                b.id,
                money(amount),
                Currency::NGN,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)), "{amount}");
    }

    Ok(())
}

#[tokio::test]
async fn test_resubmitted_reference_does_not_double_apply() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "100.00").await?;
    let b = funded_wallet(&service, "0.00").await?;

    let req = TransferRequest::new(a.user_id, a.id, b.id, money("20.00"), Currency::NGN)
        .with_reference("checkout-42");
    let first = service.transfer(req.clone()).await?;
    let again = service.transfer(req).await?;

    assert_eq!(first.id, again.id);
    assert_eq!(service.wallet(a.id).await?.balance, money("80.00"));
    assert_eq!(service.wallet(b.id).await?.balance, money("20.00"));

    let history = service.get_history(b.user_id, None, None).await?;
    assert_eq!(
        history
            .items
            .iter()
            .filter(|t| t.reference_id == "checkout-42")
            .count(),
        1
    );

    Ok(())
}

#[tokio::test]
async fn test_deposit_withdraw_round_trip() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let wallet = service.open_wallet(Uuid::new_v4(), None, None).await?;
    assert_eq!(wallet.balance, money("0.00"));
    assert_eq!(wallet.currency, Currency::NGN);
    assert_eq!(wallet.name, "Naira Wallet");

    let deposit = service
        .deposit(
            FundingRequest::new(wallet.id, money("75.50"), Currency::NGN)
                .with_description("Card top-up"),
        )
        .await?;
    assert_eq!(deposit.transaction_type, TransactionType::Deposit);
    assert_eq!(deposit.sender_wallet_id, None);
    assert_eq!(deposit.description, "Card top-up");

    let err = service
        .withdraw(FundingRequest::new(wallet.id, money("100.00"), Currency::NGN))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let withdrawal = service
        .withdraw(FundingRequest::new(wallet.id, money("75.50"), Currency::NGN))
        .await?;
    assert_eq!(withdrawal.receiver_wallet_id, None);
    assert_eq!(service.wallet(wallet.id).await?.balance, money("0.00"));

    Ok(())
}

#[tokio::test]
async fn test_reversal_restores_balances() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "100.00").await?;
    let b = funded_wallet(&service, "0.00").await?;

    let txn = service
        .transfer(TransferRequest::new(
            a.user_id,
            a.id,
            b.id,
            money("45.00"),
            Currency::NGN,
        ))
        .await?;
    let reversal = service.reverse(txn.id, None).await?;

    assert_eq!(reversal.status, TransactionStatus::Reversed);
    assert_eq!(reversal.reverses, Some(txn.id));
    assert_eq!(service.wallet(a.id).await?.balance, money("100.00"));
    assert_eq!(service.wallet(b.id).await?.balance, money("0.00"));

    // The original record is untouched
    assert_eq!(
        service.get_transaction(txn.id).await?.status,
        TransactionStatus::Completed
    );
    let info = service.get_transaction_info(txn.id).await?;
    assert_eq!(info.reversal.map(|r| r.id), Some(reversal.id));

    let err = service.reverse(txn.id, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyReversed(_)));

    Ok(())
}

#[tokio::test]
async fn test_inactive_wallet_blocks_postings() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "100.00").await?;
    let b = funded_wallet(&service, "0.00").await?;

    let frozen = service.set_wallet_active(b.id, false).await?;
    assert!(!frozen.is_active);

    let err = service
        .transfer(TransferRequest::new(
            a.user_id,
            a.id,
            b.id,
            money("10.00"),
            Currency::NGN,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WalletInactive(id) if id == b.id));

    service.set_wallet_active(b.id, true).await?;
    service
        .transfer(TransferRequest::new(
            a.user_id,
            a.id,
            b.id,
            money("10.00"),
            Currency::NGN,
        ))
        .await?;
    assert_eq!(service.wallet(b.id).await?.balance, money("10.00"));

    Ok(())
}

#[tokio::test]
async fn test_backdated_transfer_keeps_occurrence_time() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_wallet(&service, "100.00").await?;
    let b = funded_wallet(&service, "0.00").await?;

    let date = parse_date("2024-01-15");
    let txn = service
        .transfer(
            TransferRequest::new(a.user_id, a.id, b.id, money("5.00"), Currency::NGN)
                .with_made_at(date)
                .with_description("January rent share"),
        )
        .await?;

    let stored = service.get_transaction(txn.id).await?;
    assert_eq!(stored.made_at, date);
    assert!(stored.created_at > date);
    assert_eq!(stored.description, "January rent share");

    Ok(())
}

#[tokio::test]
async fn test_user_wallet_lookup() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = Uuid::new_v4();

    let err = service.wallet_for_user(user).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(_)));

    let first = service.open_wallet(user, None, None).await?;
    service
        .open_wallet(user, Some(Currency::USD), Some("Dollar Wallet".into()))
        .await?;

    assert_eq!(service.wallet_for_user(user).await?.id, first.id);
    let wallets = service.wallets_for_user(user).await?;
    assert_eq!(wallets.len(), 2);
    assert_eq!(wallets[1].name, "Dollar Wallet");
    assert_eq!(wallets[1].currency, Currency::USD);

    Ok(())
}

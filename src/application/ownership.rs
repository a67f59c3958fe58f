use crate::domain::{UserId, Wallet, WalletId};
use crate::error::LedgerError;
use crate::storage::WalletStore;

/// Fails with `NotOwner` unless `user` owns `wallet`.
pub fn ensure_owner(wallet: &Wallet, user: UserId) -> Result<(), LedgerError> {
    if !wallet.is_owned_by(user) {
        return Err(LedgerError::NotOwner {
            user,
            wallet: wallet.id,
        });
    }
    Ok(())
}

/// Load a wallet and check that `user` owns it.
pub async fn verify_owner<S>(
    store: &mut S,
    user: UserId,
    wallet_id: WalletId,
) -> Result<Wallet, LedgerError>
where
    S: WalletStore + ?Sized,
{
    let wallet = store.get_wallet(wallet_id).await?;
    ensure_owner(&wallet, user)?;
    Ok(wallet)
}

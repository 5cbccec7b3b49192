//! Client for the custodial vault and the custody moves built on it.
//!
//! The vault keeps per-asset balances as shares. Every call that moves value
//! names an `operator`: the vault only lets an operator spend `from`'s
//! balance when `operator == from` (and `from` authorizes) or when `from` has
//! approved the operator, either directly or through a signed approval.

use soroban_sdk::{contractclient, symbol_short, Address, BytesN, Env};

use crate::batch::VaultApproval;
use crate::Error;

#[contractclient(name = "VaultClient")]
pub trait VaultInterface {
    /// Pulls `amount` of `asset` from `from`'s wallet and credits `to` with
    /// shares. A non-zero `share` requests that exact share count instead.
    fn deposit(
        env: Env,
        operator: Address,
        asset: Address,
        from: Address,
        to: Address,
        amount: i128,
        share: i128,
    ) -> (i128, i128);

    /// Debits `from`'s shares and pays the underlying amount to `to`'s wallet.
    fn withdraw(
        env: Env,
        operator: Address,
        asset: Address,
        from: Address,
        to: Address,
        amount: i128,
        share: i128,
    ) -> (i128, i128);

    fn transfer(
        env: Env,
        operator: Address,
        asset: Address,
        from: Address,
        to: Address,
        share: i128,
    );

    fn to_share(env: Env, asset: Address, amount: i128, round_up: bool) -> i128;

    fn to_amount(env: Env, asset: Address, share: i128, round_up: bool) -> i128;

    fn balance_of(env: Env, asset: Address, owner: Address) -> i128;

    /// Records `user`'s approval of `master_contract` as an operator. The
    /// signature covers `(vault, user, master_contract, approved, nonce)` and
    /// `nonce` must equal the user's next unused nonce.
    fn set_master_contract_approval(
        env: Env,
        user: Address,
        master_contract: Address,
        approved: bool,
        nonce: u64,
        signature: BytesN<64>,
    );
}

/// Moves `amount` of `asset` from `from` into the current contract's custody
/// and returns the shares credited.
///
/// With `from_vault_balance` the amount is converted with floor rounding and
/// moved between vault balances; otherwise it is deposited fresh from the
/// caller's wallet.
pub fn take_custody(
    env: &Env,
    vault: &Address,
    asset: &Address,
    from: &Address,
    amount: i128,
    from_vault_balance: bool,
) -> i128 {
    let client = VaultClient::new(env, vault);
    let this = env.current_contract_address();

    if from_vault_balance {
        let shares = client.to_share(asset, &amount, &false);
        client.transfer(&this, asset, from, &this, &shares);
        shares
    } else {
        let (_, shares) = client.deposit(&this, asset, from, &this, &amount, &0);
        shares
    }
}

/// Same as [`take_custody`] for an exact share count.
pub fn take_custody_shares(
    env: &Env,
    vault: &Address,
    asset: &Address,
    from: &Address,
    shares: i128,
    from_vault_balance: bool,
) {
    let client = VaultClient::new(env, vault);
    let this = env.current_contract_address();

    if from_vault_balance {
        client.transfer(&this, asset, from, &this, &shares);
    } else {
        client.deposit(&this, asset, from, &this, &0, &shares);
    }
}

/// Pays `shares` out of the current contract's custody to `to`, either as a
/// vault balance or as a withdrawal to `to`'s wallet.
pub fn release(
    env: &Env,
    vault: &Address,
    asset: &Address,
    to: &Address,
    shares: i128,
    to_vault_balance: bool,
) {
    if shares == 0 {
        return;
    }

    let client = VaultClient::new(env, vault);
    let this = env.current_contract_address();

    if to_vault_balance {
        client.transfer(&this, asset, &this, to, &shares);
    } else {
        client.withdraw(&this, asset, &this, to, &0, &shares);
    }
}

/// Balance `owner` holds in `asset`, in asset units, either inside the vault
/// or in their wallet.
pub fn balance_in(
    env: &Env,
    vault: &Address,
    asset: &Address,
    owner: &Address,
    in_vault: bool,
) -> i128 {
    if in_vault {
        let client = VaultClient::new(env, vault);
        let shares = client.balance_of(asset, owner);
        client.to_amount(asset, &shares, &false)
    } else {
        soroban_sdk::token::Client::new(env, asset).balance(owner)
    }
}

/// Hands a signed approval to the vault so the current contract may operate
/// on `approval.user`'s balance.
///
/// Signature and nonce checks belong to the vault. A refusal is reported as
/// [`Error::ApprovalRejected`] and leaves no vault state behind.
pub fn forward_approval(env: &Env, vault: &Address, approval: &VaultApproval) -> Result<(), Error> {
    let client = VaultClient::new(env, vault);
    let accepted = client.try_set_master_contract_approval(
        &approval.user,
        &env.current_contract_address(),
        &approval.approved,
        &approval.nonce,
        &approval.signature,
    );

    if !matches!(accepted, Ok(Ok(()))) {
        return Err(Error::ApprovalRejected);
    }

    env.events().publish(
        (symbol_short!("approval"), approval.user.clone()),
        approval.approved,
    );
    Ok(())
}

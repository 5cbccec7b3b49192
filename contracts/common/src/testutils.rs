//! In-process stand-ins for the external collaborators, for tests only.

use soroban_sdk::{
    contract, contractimpl, contracttype, log, symbol_short, token, xdr::ToXdr, Address, Bytes,
    BytesN, Env,
};

pub use ed25519_dalek::SigningKey;
use ed25519_dalek::Signer;

use crate::hooks::{SwapReceiver, Tasker};
use crate::vault::{VaultClient, VaultInterface};

// ---------------------------------------------------------------------------
// Signed approvals
// ---------------------------------------------------------------------------

/// Message a user signs to approve `master` as an operator of their balance
/// in `vault`.
pub fn approval_payload(
    env: &Env,
    vault: &Address,
    user: &Address,
    master: &Address,
    approved: bool,
    nonce: u64,
) -> Bytes {
    (
        symbol_short!("approve"),
        vault.clone(),
        user.clone(),
        master.clone(),
        approved,
        nonce,
    )
        .to_xdr(env)
}

pub fn sign_approval(
    env: &Env,
    key: &SigningKey,
    vault: &Address,
    user: &Address,
    master: &Address,
    approved: bool,
    nonce: u64,
) -> BytesN<64> {
    let payload = approval_payload(env, vault, user, master, approved, nonce);
    let message: std::vec::Vec<u8> = payload.iter().collect();
    BytesN::from_array(env, &key.sign(&message).to_bytes())
}

pub fn public_key(env: &Env, key: &SigningKey) -> BytesN<32> {
    BytesN::from_array(env, &key.verifying_key().to_bytes())
}

// ---------------------------------------------------------------------------
// MockVault
// ---------------------------------------------------------------------------

/// Elastic/base pair of one asset: `elastic` tokens held against `base`
/// shares issued.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Rebase {
    pub elastic: i128,
    pub base: i128,
}

impl Rebase {
    fn to_base(&self, elastic: i128, round_up: bool) -> i128 {
        if self.elastic == 0 || self.base == 0 {
            return elastic;
        }
        let base = elastic * self.base / self.elastic;
        if round_up && base * self.elastic / self.base < elastic {
            base + 1
        } else {
            base
        }
    }

    fn to_elastic(&self, base: i128, round_up: bool) -> i128 {
        if self.elastic == 0 || self.base == 0 {
            return base;
        }
        let elastic = base * self.elastic / self.base;
        if round_up && elastic * self.base / self.elastic < base {
            elastic + 1
        } else {
            elastic
        }
    }
}

#[contracttype]
#[derive(Clone)]
struct AccountKey {
    asset: Address,
    owner: Address,
}

#[contracttype]
#[derive(Clone)]
struct OperatorKey {
    user: Address,
    operator: Address,
}

#[contracttype]
#[derive(Clone)]
enum VaultKey {
    Totals(Address),
    Balance(AccountKey),
    Approved(OperatorKey),
    Nonce(Address),
    Signer(Address),
}

fn totals(env: &Env, asset: &Address) -> Rebase {
    env.storage()
        .instance()
        .get(&VaultKey::Totals(asset.clone()))
        .unwrap_or_default()
}

fn set_totals(env: &Env, asset: &Address, total: &Rebase) {
    env.storage()
        .instance()
        .set(&VaultKey::Totals(asset.clone()), total);
}

fn balance_key(asset: &Address, owner: &Address) -> VaultKey {
    VaultKey::Balance(AccountKey {
        asset: asset.clone(),
        owner: owner.clone(),
    })
}

fn shares_of(env: &Env, asset: &Address, owner: &Address) -> i128 {
    env.storage()
        .persistent()
        .get(&balance_key(asset, owner))
        .unwrap_or(0)
}

fn credit(env: &Env, asset: &Address, owner: &Address, shares: i128) {
    let balance = shares_of(env, asset, owner) + shares;
    env.storage()
        .persistent()
        .set(&balance_key(asset, owner), &balance);
}

fn debit(env: &Env, asset: &Address, owner: &Address, shares: i128) {
    let balance = shares_of(env, asset, owner);
    if shares > balance {
        panic!("insufficient shares");
    }
    env.storage()
        .persistent()
        .set(&balance_key(asset, owner), &(balance - shares));
}

fn is_approved(env: &Env, user: &Address, operator: &Address) -> bool {
    env.storage()
        .persistent()
        .get(&VaultKey::Approved(OperatorKey {
            user: user.clone(),
            operator: operator.clone(),
        }))
        .unwrap_or(false)
}

fn set_approved(env: &Env, user: &Address, operator: &Address, approved: bool) {
    env.storage().persistent().set(
        &VaultKey::Approved(OperatorKey {
            user: user.clone(),
            operator: operator.clone(),
        }),
        &approved,
    );
}

fn authorize(env: &Env, operator: &Address, from: &Address) {
    if operator == from {
        from.require_auth();
        return;
    }
    if !is_approved(env, from, operator) {
        panic!("operator not approved");
    }
    operator.require_auth();
}

/// Share-accounting vault holding real token balances.
#[contract]
pub struct MockVault;

#[contractimpl]
impl VaultInterface for MockVault {
    fn deposit(
        env: Env,
        operator: Address,
        asset: Address,
        from: Address,
        to: Address,
        amount: i128,
        share: i128,
    ) -> (i128, i128) {
        authorize(&env, &operator, &from);

        let mut total = totals(&env, &asset);
        let (amount, share) = if share == 0 {
            (amount, total.to_base(amount, false))
        } else {
            (total.to_elastic(share, true), share)
        };

        token::Client::new(&env, &asset).transfer(&from, &env.current_contract_address(), &amount);
        credit(&env, &asset, &to, share);
        total.elastic += amount;
        total.base += share;
        set_totals(&env, &asset, &total);

        (amount, share)
    }

    fn withdraw(
        env: Env,
        operator: Address,
        asset: Address,
        from: Address,
        to: Address,
        amount: i128,
        share: i128,
    ) -> (i128, i128) {
        authorize(&env, &operator, &from);

        let mut total = totals(&env, &asset);
        let (amount, share) = if share == 0 {
            (amount, total.to_base(amount, true))
        } else {
            (total.to_elastic(share, false), share)
        };

        debit(&env, &asset, &from, share);
        total.elastic -= amount;
        total.base -= share;
        set_totals(&env, &asset, &total);
        token::Client::new(&env, &asset).transfer(&env.current_contract_address(), &to, &amount);

        (amount, share)
    }

    fn transfer(env: Env, operator: Address, asset: Address, from: Address, to: Address, share: i128) {
        authorize(&env, &operator, &from);
        debit(&env, &asset, &from, share);
        credit(&env, &asset, &to, share);
    }

    fn to_share(env: Env, asset: Address, amount: i128, round_up: bool) -> i128 {
        totals(&env, &asset).to_base(amount, round_up)
    }

    fn to_amount(env: Env, asset: Address, share: i128, round_up: bool) -> i128 {
        totals(&env, &asset).to_elastic(share, round_up)
    }

    fn balance_of(env: Env, asset: Address, owner: Address) -> i128 {
        shares_of(&env, &asset, &owner)
    }

    fn set_master_contract_approval(
        env: Env,
        user: Address,
        master_contract: Address,
        approved: bool,
        nonce: u64,
        signature: BytesN<64>,
    ) {
        let expected = Self::nonces(env.clone(), user.clone());
        if nonce != expected {
            panic!("invalid nonce");
        }

        let signer: BytesN<32> = env
            .storage()
            .persistent()
            .get(&VaultKey::Signer(user.clone()))
            .unwrap_or_else(|| panic!("no signer registered"));
        let payload = approval_payload(
            &env,
            &env.current_contract_address(),
            &user,
            &master_contract,
            approved,
            nonce,
        );
        env.crypto().ed25519_verify(&signer, &payload, &signature);

        env.storage()
            .persistent()
            .set(&VaultKey::Nonce(user.clone()), &(nonce + 1));
        set_approved(&env, &user, &master_contract, approved);
    }
}

#[contractimpl]
impl MockVault {
    /// Binds the ed25519 key whose signatures count as `user`'s approvals.
    pub fn register_signer(env: Env, user: Address, public_key: BytesN<32>) {
        user.require_auth();
        env.storage()
            .persistent()
            .set(&VaultKey::Signer(user), &public_key);
    }

    pub fn approve(env: Env, user: Address, operator: Address, approved: bool) {
        user.require_auth();
        set_approved(&env, &user, &operator, approved);
    }

    pub fn is_operator(env: Env, user: Address, operator: Address) -> bool {
        is_approved(&env, &user, &operator)
    }

    pub fn nonces(env: Env, user: Address) -> u64 {
        env.storage()
            .persistent()
            .get(&VaultKey::Nonce(user))
            .unwrap_or(0)
    }

    /// Adds tokens without minting shares, raising the amount per share.
    pub fn donate(env: Env, asset: Address, from: Address, amount: i128) {
        from.require_auth();
        token::Client::new(&env, &asset).transfer(&from, &env.current_contract_address(), &amount);
        let mut total = totals(&env, &asset);
        total.elastic += amount;
        set_totals(&env, &asset, &total);
    }

    pub fn total_of(env: Env, asset: Address) -> Rebase {
        totals(&env, &asset)
    }
}

// ---------------------------------------------------------------------------
// MockTasker
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone)]
enum TaskerKey {
    Failing,
    Calls,
    LastPayload,
}

/// Automation hook that records what it receives and can be told to fail.
#[contract]
pub struct MockTasker;

#[contractimpl]
impl MockTasker {
    pub fn set_failing(env: Env, failing: bool) {
        env.storage().instance().set(&TaskerKey::Failing, &failing);
    }

    pub fn calls(env: Env) -> u32 {
        env.storage().instance().get(&TaskerKey::Calls).unwrap_or(0)
    }

    pub fn last_payload(env: Env) -> Bytes {
        env.storage()
            .instance()
            .get(&TaskerKey::LastPayload)
            .unwrap_or_else(|| Bytes::new(&env))
    }
}

#[contractimpl]
impl Tasker for MockTasker {
    fn on_task_received(env: Env, payload: Bytes) {
        let failing: bool = env
            .storage()
            .instance()
            .get(&TaskerKey::Failing)
            .unwrap_or(false);
        if failing {
            panic!("task rejected");
        }

        let calls = Self::calls(env.clone()) + 1;
        env.storage().instance().set(&TaskerKey::Calls, &calls);
        env.storage()
            .instance()
            .set(&TaskerKey::LastPayload, &payload);
    }
}

// ---------------------------------------------------------------------------
// MockSwapReceiver
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone)]
enum SwapKey {
    Vault,
    Rate,
}

#[contracttype]
#[derive(Clone)]
struct SwapRate {
    num: i128,
    den: i128,
}

/// Swap receiver paying `num / den` output per input unit out of its own
/// vault balance of the output asset.
#[contract]
pub struct MockSwapReceiver;

#[contractimpl]
impl MockSwapReceiver {
    pub fn init(env: Env, vault: Address, num: i128, den: i128) {
        env.storage().instance().set(&SwapKey::Vault, &vault);
        env.storage()
            .instance()
            .set(&SwapKey::Rate, &SwapRate { num, den });
    }
}

#[contractimpl]
impl SwapReceiver for MockSwapReceiver {
    fn on_swap_receive(
        env: Env,
        input_asset: Address,
        input_shares: i128,
        output_asset: Address,
        min_out: i128,
        recipient: Address,
        to_vault_balance: bool,
        data: Bytes,
    ) {
        let vault: Address = env
            .storage()
            .instance()
            .get(&SwapKey::Vault)
            .unwrap_or_else(|| panic!("swap receiver not initialised"));
        let rate: SwapRate = env
            .storage()
            .instance()
            .get(&SwapKey::Rate)
            .unwrap_or_else(|| panic!("swap receiver not initialised"));

        let client = VaultClient::new(&env, &vault);
        let me = env.current_contract_address();
        let input = client.to_amount(&input_asset, &input_shares, &false);
        let output = input * rate.num / rate.den;
        log!(&env, "mock swap", input, output, min_out, data);

        if to_vault_balance {
            let shares = client.to_share(&output_asset, &output, &false);
            client.transfer(&me, &output_asset, &me, &recipient, &shares);
        } else {
            client.withdraw(&me, &output_asset, &me, &recipient, &output, &0);
        }
    }
}

//! Claim-right registry: which address may claim from a schedule.
//!
//! Holders are kept apart from the accounting records so a beneficiary can
//! hand their rights to someone else without touching balance math. Each
//! engine contract has its own registry because storage is per contract.

use soroban_sdk::{contracttype, symbol_short, Address, Env};

use crate::{Error, TTL_EXTEND_TO, TTL_THRESHOLD};

#[contracttype]
#[derive(Clone)]
enum ClaimKey {
    Holder(u64),
}

pub fn holder(env: &Env, id: u64) -> Option<Address> {
    env.storage().persistent().get(&ClaimKey::Holder(id))
}

fn set_holder(env: &Env, id: u64, to: &Address) {
    let key = ClaimKey::Holder(id);
    env.storage().persistent().set(&key, to);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

pub fn mint(env: &Env, id: u64, to: &Address) {
    set_holder(env, id, to);
    env.events().publish((symbol_short!("mint"), to.clone()), id);
}

/// Moves the claim right for `id` from `from` to `to`.
///
/// Authorization of `from` is the caller's job; this only checks that `from`
/// currently holds the right.
pub fn transfer(env: &Env, id: u64, from: &Address, to: &Address) -> Result<(), Error> {
    match holder(env, id) {
        Some(current) if current == *from => {}
        _ => return Err(Error::NotClaimHolder),
    }

    set_holder(env, id, to);
    env.events()
        .publish((symbol_short!("transfer"), from.clone(), to.clone()), id);
    Ok(())
}

pub fn burn(env: &Env, id: u64) {
    let key = ClaimKey::Holder(id);
    if let Some(from) = env.storage().persistent().get::<_, Address>(&key) {
        env.storage().persistent().remove(&key);
        env.events().publish((symbol_short!("burn"), from), id);
    }
}

//! Two-step contract ownership.
//!
//! The owner is the only address allowed to change engine-wide settings. It
//! can be handed over directly, renounced explicitly, or proposed to a
//! pending owner who then claims it.

use soroban_sdk::{contracttype, symbol_short, Address, Env};

use crate::Error;

#[contracttype]
#[derive(Clone)]
enum AdminKey {
    Owner,
    PendingOwner,
}

pub fn init(env: &Env, owner: &Address) {
    env.storage().instance().set(&AdminKey::Owner, owner);
}

/// Current owner, `None` once ownership was renounced.
pub fn owner(env: &Env) -> Option<Address> {
    env.storage().instance().get(&AdminKey::Owner)
}

pub fn pending_owner(env: &Env) -> Option<Address> {
    env.storage().instance().get(&AdminKey::PendingOwner)
}

/// Requires the owner's authorization and returns the owner.
pub fn require_owner(env: &Env) -> Result<Address, Error> {
    let owner = owner(env).ok_or(Error::NotOwner)?;
    owner.require_auth();
    Ok(owner)
}

/// Hands ownership to `new_owner`.
///
/// `direct` replaces the owner right away and clears any pending owner.
/// Handing ownership to `None` directly renounces it and is only accepted
/// when `renounce` is set. Without `direct`, `new_owner` becomes the pending
/// owner (or clears it when `None`) and must call [`claim_ownership`].
pub fn transfer_ownership(
    env: &Env,
    new_owner: Option<Address>,
    direct: bool,
    renounce: bool,
) -> Result<(), Error> {
    let current = require_owner(env)?;

    if !direct {
        match &new_owner {
            Some(pending) => env.storage().instance().set(&AdminKey::PendingOwner, pending),
            None => env.storage().instance().remove(&AdminKey::PendingOwner),
        }
        env.events()
            .publish((symbol_short!("owner"), symbol_short!("pending")), new_owner);
        return Ok(());
    }

    match &new_owner {
        Some(next) => env.storage().instance().set(&AdminKey::Owner, next),
        None if renounce => env.storage().instance().remove(&AdminKey::Owner),
        None => return Err(Error::InvalidAddressZero),
    }
    env.storage().instance().remove(&AdminKey::PendingOwner);

    env.events().publish(
        (symbol_short!("owner"), symbol_short!("transfer")),
        (Some(current), new_owner),
    );
    Ok(())
}

/// Completes a transfer started with `direct = false`.
pub fn claim_ownership(env: &Env, caller: &Address) -> Result<(), Error> {
    caller.require_auth();

    if pending_owner(env).as_ref() != Some(caller) {
        return Err(Error::NotPendingOwner);
    }

    let previous = owner(env);
    env.storage().instance().set(&AdminKey::Owner, caller);
    env.storage().instance().remove(&AdminKey::PendingOwner);

    env.events().publish(
        (symbol_short!("owner"), symbol_short!("transfer")),
        (previous, Some(caller.clone())),
    );
    Ok(())
}

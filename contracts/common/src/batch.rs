//! Sequential execution of encoded engine calls.
//!
//! The host makes each top-level invocation atomic, so the executor only has
//! to decide whether a failing call ends the batch (returning the error rolls
//! everything back) or is recorded and skipped. Engine operations run all of
//! their checks before their first write, which is what makes skipping safe.

use soroban_sdk::{contracttype, symbol_short, Address, BytesN, Env, IntoVal, TryFromVal, Val, Vec};

use crate::Error;

/// Signed grant letting the engine operate on `user`'s vault balance.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VaultApproval {
    pub user: Address,
    pub approved: bool,
    pub nonce: u64,
    pub signature: BytesN<64>,
}

/// Shares paid out by a withdrawal and where they went.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Receipt {
    pub shares: i128,
    pub to: Address,
}

/// Split of a schedule's remaining custody when it is ended early.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settlement {
    pub funder_shares: i128,
    pub beneficiary_shares: i128,
}

/// Value returned by one successful batched call.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallValue {
    Unit,
    Id(u64),
    Shares(i128),
    Receipt(Receipt),
    Settlement(Settlement),
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallOutcome {
    Done(CallValue),
    /// Error code of a call skipped under `revert_on_fail = false`.
    Failed(u32),
}

/// Runs `calls` in order through `dispatch`.
///
/// With `revert_on_fail` the first error is returned as is. Otherwise each
/// failure is recorded as [`CallOutcome::Failed`], a `skipped` event carrying
/// the call index is published, and the remaining calls still run.
pub fn execute<C, F>(
    env: &Env,
    calls: Vec<C>,
    revert_on_fail: bool,
    mut dispatch: F,
) -> Result<Vec<CallOutcome>, Error>
where
    C: IntoVal<Env, Val> + TryFromVal<Env, Val> + Clone,
    F: FnMut(C) -> Result<CallValue, Error>,
{
    let mut outcomes = Vec::new(env);

    for (index, call) in calls.iter().enumerate() {
        match dispatch(call) {
            Ok(value) => outcomes.push_back(CallOutcome::Done(value)),
            Err(err) if revert_on_fail => return Err(err),
            Err(err) => {
                env.events()
                    .publish((symbol_short!("skipped"), index as u32), err as u32);
                outcomes.push_back(CallOutcome::Failed(err as u32));
            }
        }
    }

    Ok(outcomes)
}

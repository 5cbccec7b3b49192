//! External contracts invoked while paying out of a schedule.

use soroban_sdk::{
    contractclient, contracttype, panic_with_error, symbol_short, Address, Bytes, Env,
};

use crate::Error;

/// Automation hook notified after a withdrawal that carried a payload.
#[contractclient(name = "TaskerClient")]
pub trait Tasker {
    fn on_task_received(env: Env, payload: Bytes);
}

/// Contract that converts withdrawn shares into another asset.
///
/// It receives `input_shares` of `input_asset` in its vault balance before
/// the call and must credit `recipient` with at least `min_out` of
/// `output_asset`, in the vault when `to_vault_balance` is set or in the
/// recipient's wallet otherwise.
#[contractclient(name = "SwapReceiverClient")]
pub trait SwapReceiver {
    fn on_swap_receive(
        env: Env,
        input_asset: Address,
        input_shares: i128,
        output_asset: Address,
        min_out: i128,
        recipient: Address,
        to_vault_balance: bool,
        data: Bytes,
    );
}

/// What a failing automation hook does to the withdrawal that triggered it.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskPolicy {
    /// The withdrawal stands and a `task_fail` event records the failure.
    BestEffort = 0,
    /// The whole invocation aborts with [`Error::TaskFailed`].
    Required = 1,
}

/// Delivers `payload` to the hook at `target` once the withdrawal's own
/// state and transfers are committed. Empty payloads skip the call.
pub fn dispatch_task(
    env: &Env,
    policy: TaskPolicy,
    target: &Address,
    schedule_id: u64,
    payload: &Bytes,
) {
    if payload.is_empty() {
        return;
    }

    let delivered = matches!(
        TaskerClient::new(env, target).try_on_task_received(payload),
        Ok(Ok(()))
    );

    if delivered {
        env.events()
            .publish((symbol_short!("task_ok"), schedule_id), target.clone());
        return;
    }

    match policy {
        TaskPolicy::Required => panic_with_error!(env, Error::TaskFailed),
        TaskPolicy::BestEffort => env
            .events()
            .publish((symbol_short!("task_fail"), schedule_id), target.clone()),
    }
}

#![no_std]

mod accrual;

use soroban_sdk::{
    contract, contractimpl, contracttype, panic_with_error, symbol_short, Address, Bytes, BytesN,
    Env, Vec,
};
use tidepool_common::{
    admin,
    batch::{self, CallOutcome, CallValue, Receipt, Settlement, VaultApproval},
    claim,
    hooks::{self, SwapReceiverClient, TaskPolicy},
    vault, Error, TTL_EXTEND_TO, TTL_THRESHOLD,
};

pub use accrual::accrued_shares;

/// Id given to the first stream created.
pub const FIRST_STREAM_ID: u64 = 1000;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Engine-wide configuration.
#[contracttype]
#[derive(Clone, Debug)]
pub struct Config {
    pub vault: Address,
    pub task_policy: TaskPolicy,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stream {
    pub stream_id: u64,
    pub sender: Address,
    /// Beneficiary named at creation. The live beneficiary is the claim holder.
    pub recipient: Address,
    pub asset: Address,
    pub deposited_shares: i128,
    pub withdrawn_shares: i128,
    pub start_time: u64,
    pub end_time: u64,
}

/// Split of a stream's custody at the current time.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamBalance {
    /// Shares not yet streamed; independent of withdrawals.
    pub sender_balance: i128,
    /// Shares streamed and not yet withdrawn.
    pub recipient_balance: i128,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct CreateStreamParams {
    pub recipient: Address,
    pub asset: Address,
    pub start_time: u64,
    pub end_time: u64,
    pub amount: i128,
    pub from_vault_balance: bool,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct WithdrawParams {
    pub stream_id: u64,
    pub amount: i128,
    pub withdraw_to: Option<Address>,
    pub to_vault_balance: bool,
    pub task_payload: Bytes,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct SwapParams {
    pub stream_id: u64,
    pub amount: i128,
    pub output_asset: Address,
    pub min_out: i128,
    pub swap_receiver: Address,
    pub data: Bytes,
    pub to_vault_balance: bool,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct CancelParams {
    pub stream_id: u64,
    pub to_vault_balance: bool,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct UpdateSenderParams {
    pub stream_id: u64,
    pub new_sender: Address,
}

/// One operation of a [`TidepoolStream::batch`] call.
#[contracttype]
#[derive(Clone, Debug)]
pub enum StreamCall {
    CreateStream(CreateStreamParams),
    Withdraw(WithdrawParams),
    WithdrawSwap(SwapParams),
    Cancel(CancelParams),
    UpdateSender(UpdateSenderParams),
    VaultApproval(VaultApproval),
}

/// Namespace for all contract storage keys.
#[contracttype]
pub enum DataKey {
    Config,               // Instance storage for vault address and hook policy.
    NextStreamId,         // Instance storage for the auto-incrementing ID counter.
    Stream(u64),          // Persistent storage for individual stream data.
    Whitelisted(Address), // Persistent storage for approved swap receivers.
}

// ---------------------------------------------------------------------------
// Storage helpers
// ---------------------------------------------------------------------------

fn get_config(env: &Env) -> Config {
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .expect("contract not initialised: missing config")
}

fn set_config(env: &Env, config: &Config) {
    env.storage().instance().set(&DataKey::Config, config);
}

fn next_stream_id(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::NextStreamId)
        .unwrap_or(FIRST_STREAM_ID)
}

fn set_next_stream_id(env: &Env, id: u64) {
    env.storage().instance().set(&DataKey::NextStreamId, &id);
    env.storage()
        .instance()
        .extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn load_stream(env: &Env, stream_id: u64) -> Result<Stream, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Stream(stream_id))
        .ok_or(Error::InvalidStream)
}

fn save_stream(env: &Env, stream: &Stream) {
    let key = DataKey::Stream(stream.stream_id);
    env.storage().persistent().set(&key, stream);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn remove_stream(env: &Env, stream_id: u64) {
    env.storage()
        .persistent()
        .remove(&DataKey::Stream(stream_id));
}

fn is_whitelisted(env: &Env, receiver: &Address) -> bool {
    env.storage()
        .persistent()
        .get(&DataKey::Whitelisted(receiver.clone()))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

impl TidepoolStream {
    fn beneficiary(env: &Env, stream: &Stream) -> Result<Address, Error> {
        claim::holder(env, stream.stream_id).ok_or(Error::InvalidStream)
    }

    fn balance_at(stream: &Stream, now: u64) -> StreamBalance {
        let accrued = accrued_shares(
            stream.deposited_shares,
            stream.start_time,
            stream.end_time,
            now,
        );
        StreamBalance {
            sender_balance: stream.deposited_shares - accrued,
            recipient_balance: accrued - stream.withdrawn_shares,
        }
    }

    /// Checks a withdrawal amount against what the beneficiary can claim now.
    fn check_withdrawable(env: &Env, stream: &Stream, amount: i128) -> Result<(), Error> {
        if amount < 0 {
            return Err(Error::InvalidAmount);
        }
        let balance = Self::balance_at(stream, env.ledger().timestamp());
        if amount > balance.recipient_balance {
            return Err(Error::InvalidWithdrawTooMuch);
        }
        Ok(())
    }

    fn create_as(env: &Env, caller: &Address, params: CreateStreamParams) -> Result<u64, Error> {
        let now = env.ledger().timestamp();
        if params.start_time <= now {
            return Err(Error::InvalidStartTime);
        }
        if params.end_time <= params.start_time {
            return Err(Error::InvalidEndTime);
        }
        if params.recipient == env.current_contract_address() {
            return Err(Error::InvalidAddressSelf);
        }
        if params.recipient == *caller {
            return Err(Error::InvalidAddressSender);
        }
        if params.amount <= 0 {
            return Err(Error::InvalidAmount);
        }

        let config = get_config(env);
        let deposited_shares = vault::take_custody(
            env,
            &config.vault,
            &params.asset,
            caller,
            params.amount,
            params.from_vault_balance,
        );

        let stream_id = next_stream_id(env);
        set_next_stream_id(env, stream_id + 1);

        let stream = Stream {
            stream_id,
            sender: caller.clone(),
            recipient: params.recipient.clone(),
            asset: params.asset,
            deposited_shares,
            withdrawn_shares: 0,
            start_time: params.start_time,
            end_time: params.end_time,
        };
        save_stream(env, &stream);
        claim::mint(env, stream_id, &params.recipient);

        env.events().publish(
            (symbol_short!("created"), stream_id),
            (caller.clone(), params.recipient, deposited_shares),
        );
        Ok(stream_id)
    }

    fn withdraw_as(env: &Env, caller: &Address, params: WithdrawParams) -> Result<Receipt, Error> {
        let mut stream = load_stream(env, params.stream_id)?;
        let holder = Self::beneficiary(env, &stream)?;
        if *caller != stream.sender && *caller != holder {
            return Err(Error::NotSenderOrRecipient);
        }
        Self::check_withdrawable(env, &stream, params.amount)?;

        // The sender can trigger a payout but never redirect it.
        let to = match params.withdraw_to {
            Some(to) if *caller == holder => to,
            _ => holder,
        };

        stream.withdrawn_shares += params.amount;
        save_stream(env, &stream);

        let config = get_config(env);
        vault::release(
            env,
            &config.vault,
            &stream.asset,
            &to,
            params.amount,
            params.to_vault_balance,
        );

        env.events().publish(
            (symbol_short!("withdrew"), stream.stream_id),
            (params.amount, to.clone()),
        );

        hooks::dispatch_task(
            env,
            config.task_policy,
            &to,
            stream.stream_id,
            &params.task_payload,
        );

        Ok(Receipt {
            shares: params.amount,
            to,
        })
    }

    fn withdraw_swap_as(env: &Env, caller: &Address, params: SwapParams) -> Result<i128, Error> {
        let mut stream = load_stream(env, params.stream_id)?;
        let holder = Self::beneficiary(env, &stream)?;
        if *caller != holder {
            return Err(Error::NotRecipient);
        }
        if !is_whitelisted(env, &params.swap_receiver) {
            return Err(Error::InvalidSwapper);
        }
        Self::check_withdrawable(env, &stream, params.amount)?;

        stream.withdrawn_shares += params.amount;
        save_stream(env, &stream);

        let config = get_config(env);
        let before = vault::balance_in(
            env,
            &config.vault,
            &params.output_asset,
            &holder,
            params.to_vault_balance,
        );

        vault::release(
            env,
            &config.vault,
            &stream.asset,
            &params.swap_receiver,
            params.amount,
            true,
        );
        SwapReceiverClient::new(env, &params.swap_receiver).on_swap_receive(
            &stream.asset,
            &params.amount,
            &params.output_asset,
            &params.min_out,
            &holder,
            &params.to_vault_balance,
            &params.data,
        );

        let after = vault::balance_in(
            env,
            &config.vault,
            &params.output_asset,
            &holder,
            params.to_vault_balance,
        );
        let received = after - before;
        if received < params.min_out {
            panic_with_error!(env, Error::ReceivedTooLess);
        }

        env.events().publish(
            (symbol_short!("swapped"), stream.stream_id),
            (params.amount, params.output_asset, received),
        );
        Ok(received)
    }

    fn cancel_as(env: &Env, caller: &Address, params: CancelParams) -> Result<Settlement, Error> {
        let stream = load_stream(env, params.stream_id)?;
        let holder = Self::beneficiary(env, &stream)?;
        if *caller != stream.sender && *caller != holder {
            return Err(Error::NotSenderOrRecipient);
        }

        let balance = Self::balance_at(&stream, env.ledger().timestamp());

        remove_stream(env, stream.stream_id);
        claim::burn(env, stream.stream_id);

        let config = get_config(env);
        vault::release(
            env,
            &config.vault,
            &stream.asset,
            &holder,
            balance.recipient_balance,
            params.to_vault_balance,
        );
        vault::release(
            env,
            &config.vault,
            &stream.asset,
            &stream.sender,
            balance.sender_balance,
            params.to_vault_balance,
        );

        env.events().publish(
            (symbol_short!("cancelled"), stream.stream_id),
            (balance.sender_balance, balance.recipient_balance),
        );
        Ok(Settlement {
            funder_shares: balance.sender_balance,
            beneficiary_shares: balance.recipient_balance,
        })
    }

    fn update_sender_as(
        env: &Env,
        caller: &Address,
        params: UpdateSenderParams,
    ) -> Result<(), Error> {
        let mut stream = load_stream(env, params.stream_id)?;
        if *caller != stream.sender {
            return Err(Error::NotSender);
        }

        stream.sender = params.new_sender.clone();
        save_stream(env, &stream);

        env.events().publish(
            (symbol_short!("sender"), stream.stream_id),
            params.new_sender,
        );
        Ok(())
    }

    fn dispatch(env: &Env, caller: &Address, call: StreamCall) -> Result<CallValue, Error> {
        match call {
            StreamCall::CreateStream(params) => {
                Self::create_as(env, caller, params).map(CallValue::Id)
            }
            StreamCall::Withdraw(params) => {
                Self::withdraw_as(env, caller, params).map(CallValue::Receipt)
            }
            StreamCall::WithdrawSwap(params) => {
                Self::withdraw_swap_as(env, caller, params).map(CallValue::Shares)
            }
            StreamCall::Cancel(params) => {
                Self::cancel_as(env, caller, params).map(CallValue::Settlement)
            }
            StreamCall::UpdateSender(params) => {
                Self::update_sender_as(env, caller, params).map(|_| CallValue::Unit)
            }
            StreamCall::VaultApproval(approval) => {
                vault::forward_approval(env, &get_config(env).vault, &approval)
                    .map(|_| CallValue::Unit)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Contract Implementation
// ---------------------------------------------------------------------------

#[contract]
pub struct TidepoolStream;

#[contractimpl]
impl TidepoolStream {
    /// Initialise the engine with its custody vault and administrative owner.
    ///
    /// Must be called exactly once before any other operation. The automation
    /// hook policy starts as [`TaskPolicy::BestEffort`].
    ///
    /// # Parameters
    /// - `vault`: Vault contract holding every stream's deposit as shares
    /// - `owner`: Address allowed to whitelist swap receivers and change settings
    ///
    /// # Panics
    /// - If called more than once (`"already initialised"`)
    pub fn init(env: Env, vault: Address, owner: Address) {
        if env.storage().instance().has(&DataKey::Config) {
            panic!("already initialised");
        }
        set_config(
            &env,
            &Config {
                vault,
                task_policy: TaskPolicy::BestEffort,
            },
        );
        admin::init(&env, &owner);
        env.storage()
            .instance()
            .set(&DataKey::NextStreamId, &FIRST_STREAM_ID);

        env.storage()
            .instance()
            .extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
    }

    pub fn get_config(env: Env) -> Config {
        get_config(&env)
    }

    /// Create a stream releasing `amount` of `asset` to `recipient` linearly
    /// between `start_time` and `end_time`.
    ///
    /// The deposit moves into the engine's vault balance, either out of the
    /// caller's existing vault balance (`from_vault_balance`) or deposited fresh
    /// from the caller's wallet. The engine must be an approved operator of
    /// the caller in the vault, which [`TidepoolStream::batch`] can arrange in
    /// the same call through a signed [`VaultApproval`].
    ///
    /// # Returns
    /// - `u64`: the new stream id (ids start at 1000)
    ///
    /// # Authorization
    /// - Requires authorization from `caller`, who becomes the sender
    ///
    /// # Errors
    /// - [`Error::InvalidStartTime`] if `start_time` is not in the future
    /// - [`Error::InvalidEndTime`] if `end_time <= start_time`
    /// - [`Error::InvalidAddressSelf`] if `recipient` is this contract
    /// - [`Error::InvalidAddressSender`] if `recipient` is the caller
    /// - [`Error::InvalidAmount`] if `amount` is not positive
    ///
    /// # Events
    /// - `created(stream_id)` with `(sender, recipient, deposited_shares)`
    /// - `mint(recipient)` with the stream id, from the claim registry
    #[allow(clippy::too_many_arguments)]
    pub fn create_stream(
        env: Env,
        caller: Address,
        recipient: Address,
        asset: Address,
        start_time: u64,
        end_time: u64,
        amount: i128,
        from_vault_balance: bool,
    ) -> Result<u64, Error> {
        caller.require_auth();
        Self::create_as(
            &env,
            &caller,
            CreateStreamParams {
                recipient,
                asset,
                start_time,
                end_time,
                amount,
                from_vault_balance,
            },
        )
    }

    pub fn get_stream(env: Env, stream_id: u64) -> Result<Stream, Error> {
        load_stream(&env, stream_id)
    }

    /// Current split of a stream's deposit.
    ///
    /// `accrued = floor(deposited * elapsed / duration)` with `elapsed`
    /// clamped to the stream window. The recipient side is `accrued -
    /// withdrawn`, the sender side is `deposited - accrued`.
    ///
    /// # Errors
    /// - [`Error::InvalidStream`] for an unknown or cancelled stream
    pub fn stream_balance_of(env: Env, stream_id: u64) -> Result<StreamBalance, Error> {
        let stream = load_stream(&env, stream_id)?;
        Ok(Self::balance_at(&stream, env.ledger().timestamp()))
    }

    /// Id the next created stream will receive.
    pub fn stream_ids(env: Env) -> u64 {
        next_stream_id(&env)
    }

    /// Current holder of the stream's claim right.
    pub fn owner_of(env: Env, stream_id: u64) -> Result<Address, Error> {
        claim::holder(&env, stream_id).ok_or(Error::InvalidStream)
    }

    /// Hand the claim right of `stream_id` from `from` to `to`.
    pub fn transfer_claim(env: Env, from: Address, to: Address, stream_id: u64) -> Result<(), Error> {
        from.require_auth();
        claim::transfer(&env, stream_id, &from, &to)
    }

    /// Withdraw `amount` streamed shares.
    ///
    /// Either the sender or the beneficiary may trigger the withdrawal. Only
    /// the beneficiary's `withdraw_to` is honoured; otherwise the payout goes
    /// to the beneficiary. The withdrawal is recorded before the vault
    /// transfer and the automation hook run.
    ///
    /// # Parameters
    /// - `amount`: shares to withdraw, at most the current recipient balance
    /// - `withdraw_to`: optional payout address, beneficiary only
    /// - `to_vault_balance`: pay as a vault balance instead of a wallet transfer
    /// - `task_payload`: when non-empty, delivered to the payout address's
    ///   `on_task_received` hook afterwards. The payout address must then be
    ///   a contract: a plain account cannot take the call, which counts as a
    ///   failed hook.
    ///
    /// # Errors
    /// - [`Error::InvalidStream`] for an unknown or cancelled stream
    /// - [`Error::NotSenderOrRecipient`] if the caller is neither party
    /// - [`Error::InvalidAmount`] if `amount` is negative
    /// - [`Error::InvalidWithdrawTooMuch`] if `amount` exceeds the recipient balance
    /// - [`Error::TaskFailed`] if the hook fails under [`TaskPolicy::Required`]
    ///
    /// # Events
    /// - `withdrew(stream_id)` with `(amount, to)`
    /// - `task_ok(stream_id)` or `task_fail(stream_id)` when a payload was sent
    pub fn withdraw_from_stream(
        env: Env,
        caller: Address,
        stream_id: u64,
        amount: i128,
        withdraw_to: Option<Address>,
        to_vault_balance: bool,
        task_payload: Bytes,
    ) -> Result<Receipt, Error> {
        caller.require_auth();
        Self::withdraw_as(
            &env,
            &caller,
            WithdrawParams {
                stream_id,
                amount,
                withdraw_to,
                to_vault_balance,
                task_payload,
            },
        )
    }

    /// Withdraw streamed shares through a whitelisted swap receiver.
    ///
    /// The shares are moved to `swap_receiver`'s vault balance and the
    /// receiver is asked to pay at least `min_out` of `output_asset` to the
    /// beneficiary. Returns the amount of `output_asset` the beneficiary
    /// actually received.
    ///
    /// # Errors
    /// - [`Error::NotRecipient`] if the caller is not the beneficiary
    /// - [`Error::InvalidSwapper`] if `swap_receiver` is not whitelisted
    /// - [`Error::InvalidWithdrawTooMuch`] if `amount` exceeds the recipient balance
    /// - [`Error::ReceivedTooLess`] if the beneficiary received less than `min_out`
    #[allow(clippy::too_many_arguments)]
    pub fn withdraw_swap(
        env: Env,
        caller: Address,
        stream_id: u64,
        amount: i128,
        output_asset: Address,
        min_out: i128,
        swap_receiver: Address,
        data: Bytes,
        to_vault_balance: bool,
    ) -> Result<i128, Error> {
        caller.require_auth();
        Self::withdraw_swap_as(
            &env,
            &caller,
            SwapParams {
                stream_id,
                amount,
                output_asset,
                min_out,
                swap_receiver,
                data,
                to_vault_balance,
            },
        )
    }

    /// Cancel a stream and settle it.
    ///
    /// The beneficiary receives everything streamed and not yet withdrawn,
    /// the sender receives everything not yet streamed. The stream and its
    /// claim right are deleted; later lookups fail with
    /// [`Error::InvalidStream`].
    ///
    /// # Errors
    /// - [`Error::InvalidStream`] for an unknown or already cancelled stream
    /// - [`Error::NotSenderOrRecipient`] if the caller is neither party
    pub fn cancel_stream(
        env: Env,
        caller: Address,
        stream_id: u64,
        to_vault_balance: bool,
    ) -> Result<Settlement, Error> {
        caller.require_auth();
        Self::cancel_as(
            &env,
            &caller,
            CancelParams {
                stream_id,
                to_vault_balance,
            },
        )
    }

    /// Reassign the sender side of a stream. Sender only.
    pub fn update_sender(
        env: Env,
        caller: Address,
        stream_id: u64,
        new_sender: Address,
    ) -> Result<(), Error> {
        caller.require_auth();
        Self::update_sender_as(
            &env,
            &caller,
            UpdateSenderParams {
                stream_id,
                new_sender,
            },
        )
    }

    /// Forward `user`'s signed operator approval of this engine to the vault.
    ///
    /// The signature is the authorization; the vault checks it and the nonce.
    pub fn set_vault_approval(
        env: Env,
        user: Address,
        approved: bool,
        nonce: u64,
        signature: BytesN<64>,
    ) -> Result<(), Error> {
        vault::forward_approval(
            &env,
            &get_config(&env).vault,
            &VaultApproval {
                user,
                approved,
                nonce,
                signature,
            },
        )
    }

    /// Run several operations as `caller` in one invocation.
    ///
    /// With `revert_on_fail` the first failing operation fails the whole
    /// batch and nothing is applied. Without it, operations failing their
    /// checks are reported as [`CallOutcome::Failed`] and skipped while the
    /// rest still run.
    ///
    /// # Authorization
    /// - Requires authorization from `caller` once for the whole batch
    pub fn batch(
        env: Env,
        caller: Address,
        calls: Vec<StreamCall>,
        revert_on_fail: bool,
    ) -> Result<Vec<CallOutcome>, Error> {
        caller.require_auth();
        batch::execute(&env, calls, revert_on_fail, |call| {
            Self::dispatch(&env, &caller, call)
        })
    }

    pub fn is_whitelisted(env: Env, receiver: Address) -> bool {
        is_whitelisted(&env, &receiver)
    }
}

#[contractimpl]
impl TidepoolStream {
    /// Allow or forbid `receiver` as a swap receiver. Owner only.
    ///
    /// # Events
    /// - `whitelist(receiver)` with the new flag
    pub fn whitelist_receiver(env: Env, receiver: Address, approved: bool) -> Result<(), Error> {
        admin::require_owner(&env)?;

        let key = DataKey::Whitelisted(receiver.clone());
        env.storage().persistent().set(&key, &approved);
        env.storage()
            .persistent()
            .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);

        env.events()
            .publish((symbol_short!("whitelist"), receiver), approved);
        Ok(())
    }

    /// Choose what a failing automation hook does to a withdrawal. Owner only.
    pub fn set_task_policy(env: Env, policy: TaskPolicy) -> Result<(), Error> {
        admin::require_owner(&env)?;
        let mut config = get_config(&env);
        config.task_policy = policy;
        set_config(&env, &config);
        Ok(())
    }

    /// Hand over engine ownership. See [`admin::transfer_ownership`].
    pub fn transfer_ownership(
        env: Env,
        new_owner: Option<Address>,
        direct: bool,
        renounce: bool,
    ) -> Result<(), Error> {
        admin::transfer_ownership(&env, new_owner, direct, renounce)
    }

    pub fn claim_ownership(env: Env, caller: Address) -> Result<(), Error> {
        admin::claim_ownership(&env, &caller)
    }

    pub fn owner(env: Env) -> Option<Address> {
        admin::owner(&env)
    }

    pub fn pending_owner(env: Env) -> Option<Address> {
        admin::pending_owner(&env)
    }
}

#![no_std]

mod schedule;

use soroban_sdk::{
    contract, contractimpl, contracttype, symbol_short, Address, Bytes, BytesN, Env, Vec,
};
use tidepool_common::{
    admin,
    batch::{self, CallOutcome, CallValue, Settlement, VaultApproval},
    claim,
    hooks::{self, TaskPolicy},
    vault::{self, VaultClient},
    Error, TTL_EXTEND_TO, TTL_THRESHOLD,
};

pub use schedule::StepSchedule;

/// Id given to the first vest created.
pub const FIRST_VEST_ID: u64 = 1;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[contracttype]
#[derive(Clone, Debug)]
pub struct Config {
    pub vault: Address,
    pub task_policy: TaskPolicy,
}

/// A cliff-and-step vesting schedule.
///
/// The beneficiary is not stored here: it is whoever holds the vest's claim
/// right. `deposited_shares == cliff_shares + step_shares * steps`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vest {
    pub vest_id: u64,
    /// `None` once the vest was stopped.
    pub fund_owner: Option<Address>,
    pub asset: Address,
    pub deposited_shares: i128,
    pub withdrawn_shares: i128,
    pub start_time: u64,
    pub cliff_duration: u64,
    pub step_duration: u64,
    pub steps: u32,
    pub cliff_shares: i128,
    pub step_shares: i128,
    /// Time vesting was frozen at by `stop_vesting`.
    pub stopped_at: Option<u64>,
}

impl Vest {
    pub fn schedule(&self) -> StepSchedule {
        StepSchedule {
            start_time: self.start_time,
            cliff_duration: self.cliff_duration,
            step_duration: self.step_duration,
            steps: self.steps,
            cliff_shares: self.cliff_shares,
            step_shares: self.step_shares,
        }
    }

    /// Vested and not yet withdrawn at `now`.
    pub fn claimable(&self, now: u64) -> i128 {
        let at = self.stopped_at.unwrap_or(now);
        self.schedule().vested_at(at) - self.withdrawn_shares
    }
}

/// Arguments of [`TidepoolVesting::create_vesting`]. Amounts are in asset
/// units and converted to shares at creation.
#[contracttype]
#[derive(Clone, Debug)]
pub struct VestParams {
    pub asset: Address,
    pub recipient: Address,
    pub start_time: u64,
    pub cliff_duration: u64,
    pub step_duration: u64,
    pub steps: u32,
    pub cliff_amount: i128,
    pub step_amount: i128,
    pub from_vault_balance: bool,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct VestWithdrawParams {
    pub vest_id: u64,
    pub task_payload: Bytes,
    pub to_vault_balance: bool,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct StopParams {
    pub vest_id: u64,
    pub to_vault_balance: bool,
}

#[contracttype]
#[derive(Clone, Debug)]
pub struct UpdateOwnerParams {
    pub vest_id: u64,
    pub new_owner: Address,
}

#[contracttype]
#[derive(Clone, Debug)]
pub enum VestCall {
    CreateVesting(VestParams),
    Withdraw(VestWithdrawParams),
    Stop(StopParams),
    UpdateOwner(UpdateOwnerParams),
    VaultApproval(VaultApproval),
}

#[contracttype]
pub enum DataKey {
    Config,
    NextVestId,
    Vest(u64),
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

fn next_vest_id(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::NextVestId)
        .unwrap_or(FIRST_VEST_ID)
}

fn set_next_vest_id(env: &Env, id: u64) {
    env.storage().instance().set(&DataKey::NextVestId, &id);
    env.storage()
        .instance()
        .extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn load_vest(env: &Env, vest_id: u64) -> Result<Vest, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Vest(vest_id))
        .ok_or(Error::InvalidVest)
}

fn save_vest(env: &Env, vest: &Vest) {
    let key = DataKey::Vest(vest.vest_id);
    env.storage().persistent().set(&key, vest);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

impl TidepoolVesting {
    fn beneficiary(env: &Env, vest_id: u64) -> Result<Address, Error> {
        claim::holder(env, vest_id).ok_or(Error::InvalidVest)
    }

    fn require_fund_owner(vest: &Vest, caller: &Address) -> Result<(), Error> {
        match &vest.fund_owner {
            Some(owner) if owner == caller => Ok(()),
            _ => Err(Error::NotOwner),
        }
    }

    fn create_as(env: &Env, caller: &Address, params: VestParams) -> Result<u64, Error> {
        if params.start_time <= env.ledger().timestamp() {
            return Err(Error::InvalidStart);
        }
        if params.cliff_amount < 0 || params.step_amount < 0 {
            return Err(Error::InvalidAmount);
        }
        if params.steps > 0 && params.step_duration == 0 {
            return Err(Error::InvalidStepSetting);
        }

        let config = get_config(env);
        let client = VaultClient::new(env, &config.vault);
        let schedule = StepSchedule {
            start_time: params.start_time,
            cliff_duration: params.cliff_duration,
            step_duration: params.step_duration,
            steps: params.steps,
            cliff_shares: client.to_share(&params.asset, &params.cliff_amount, &false),
            step_shares: client.to_share(&params.asset, &params.step_amount, &false),
        };
        if schedule.cliff_time().is_none() {
            return Err(Error::InvalidStart);
        }
        let deposited_shares = schedule.total_shares().ok_or(Error::InvalidAmount)?;
        if deposited_shares <= 0 {
            return Err(Error::InvalidAmount);
        }

        vault::take_custody_shares(
            env,
            &config.vault,
            &params.asset,
            caller,
            deposited_shares,
            params.from_vault_balance,
        );

        let vest_id = next_vest_id(env);
        set_next_vest_id(env, vest_id + 1);

        let vest = Vest {
            vest_id,
            fund_owner: Some(caller.clone()),
            asset: params.asset,
            deposited_shares,
            withdrawn_shares: 0,
            start_time: schedule.start_time,
            cliff_duration: schedule.cliff_duration,
            step_duration: schedule.step_duration,
            steps: schedule.steps,
            cliff_shares: schedule.cliff_shares,
            step_shares: schedule.step_shares,
            stopped_at: None,
        };
        save_vest(env, &vest);
        claim::mint(env, vest_id, &params.recipient);

        env.events().publish(
            (symbol_short!("vested"), vest_id),
            (caller.clone(), params.recipient, deposited_shares),
        );
        Ok(vest_id)
    }

    fn withdraw_as(env: &Env, caller: &Address, params: VestWithdrawParams) -> Result<i128, Error> {
        let mut vest = load_vest(env, params.vest_id)?;
        let holder = Self::beneficiary(env, vest.vest_id)?;
        if *caller != holder {
            return Err(Error::NotVestReceiver);
        }

        let amount = vest.claimable(env.ledger().timestamp());
        vest.withdrawn_shares += amount;
        save_vest(env, &vest);

        let config = get_config(env);
        vault::release(
            env,
            &config.vault,
            &vest.asset,
            &holder,
            amount,
            params.to_vault_balance,
        );

        env.events().publish(
            (symbol_short!("vest_wd"), vest.vest_id),
            (amount, holder.clone()),
        );

        hooks::dispatch_task(
            env,
            config.task_policy,
            &holder,
            vest.vest_id,
            &params.task_payload,
        );
        Ok(amount)
    }

    fn stop_as(env: &Env, caller: &Address, params: StopParams) -> Result<Settlement, Error> {
        let mut vest = load_vest(env, params.vest_id)?;
        Self::require_fund_owner(&vest, caller)?;
        let holder = Self::beneficiary(env, vest.vest_id)?;

        let now = env.ledger().timestamp();
        let beneficiary_shares = vest.claimable(now);
        let funder_shares = vest.deposited_shares - vest.withdrawn_shares - beneficiary_shares;

        vest.withdrawn_shares += beneficiary_shares;
        vest.fund_owner = None;
        vest.stopped_at = Some(now);
        save_vest(env, &vest);

        let config = get_config(env);
        vault::release(
            env,
            &config.vault,
            &vest.asset,
            &holder,
            beneficiary_shares,
            params.to_vault_balance,
        );
        vault::release(
            env,
            &config.vault,
            &vest.asset,
            caller,
            funder_shares,
            params.to_vault_balance,
        );

        env.events().publish(
            (symbol_short!("stopped"), vest.vest_id),
            (funder_shares, beneficiary_shares),
        );
        Ok(Settlement {
            funder_shares,
            beneficiary_shares,
        })
    }

    fn update_owner_as(
        env: &Env,
        caller: &Address,
        params: UpdateOwnerParams,
    ) -> Result<(), Error> {
        let mut vest = load_vest(env, params.vest_id)?;
        Self::require_fund_owner(&vest, caller)?;

        vest.fund_owner = Some(params.new_owner.clone());
        save_vest(env, &vest);

        env.events()
            .publish((symbol_short!("owner"), vest.vest_id), params.new_owner);
        Ok(())
    }

    fn dispatch(env: &Env, caller: &Address, call: VestCall) -> Result<CallValue, Error> {
        match call {
            VestCall::CreateVesting(params) => {
                Self::create_as(env, caller, params).map(CallValue::Id)
            }
            VestCall::Withdraw(params) => {
                Self::withdraw_as(env, caller, params).map(CallValue::Shares)
            }
            VestCall::Stop(params) => Self::stop_as(env, caller, params).map(CallValue::Settlement),
            VestCall::UpdateOwner(params) => {
                Self::update_owner_as(env, caller, params).map(|_| CallValue::Unit)
            }
            VestCall::VaultApproval(approval) => {
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
pub struct TidepoolVesting;

#[contractimpl]
impl TidepoolVesting {
    /// Initialise the engine with its custody vault and administrative owner.
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
            .set(&DataKey::NextVestId, &FIRST_VEST_ID);

        env.storage()
            .instance()
            .extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
    }

    /// Custody vault and automation-hook policy of this engine.
    pub fn get_config(env: Env) -> Config {
        get_config(&env)
    }

    /// Create a vest funded by `caller` for `params.recipient`.
    ///
    /// `cliff_amount` and `step_amount` are converted to shares rounding
    /// down, and exactly `cliff_shares + step_shares * steps` shares are
    /// taken into custody, from the caller's vault balance or their wallet.
    /// The caller becomes the vest's fund owner; the recipient receives its
    /// claim right.
    ///
    /// # Errors
    /// - [`Error::InvalidStart`] if `start_time` is not in the future or the
    ///   cliff ends past the last representable timestamp
    /// - [`Error::InvalidStepSetting`] if `steps > 0` and `step_duration == 0`
    /// - [`Error::InvalidAmount`] for negative amounts, an empty vest, or a
    ///   total that does not fit in `i128`
    ///
    /// # Events
    /// - `vested(vest_id)` with `(fund_owner, recipient, deposited_shares)`
    pub fn create_vesting(env: Env, caller: Address, params: VestParams) -> Result<u64, Error> {
        caller.require_auth();
        Self::create_as(&env, &caller, params)
    }

    /// Stored record of a vest, stopped ones included.
    ///
    /// # Errors
    /// - [`Error::InvalidVest`] for an unknown vest
    pub fn get_vest(env: Env, vest_id: u64) -> Result<Vest, Error> {
        load_vest(&env, vest_id)
    }

    /// Shares the beneficiary could withdraw right now.
    ///
    /// Zero before the cliff, then `cliff + step * min(steps, elapsed
    /// steps)` minus what was already withdrawn. A stopped vest is evaluated
    /// at the time it was stopped.
    pub fn vest_balance(env: Env, vest_id: u64) -> Result<i128, Error> {
        let vest = load_vest(&env, vest_id)?;
        Ok(vest.claimable(env.ledger().timestamp()))
    }

    /// Id the next created vest will receive.
    pub fn vest_ids(env: Env) -> u64 {
        next_vest_id(&env)
    }

    /// Current holder of the vest's claim right, i.e. its beneficiary.
    ///
    /// # Errors
    /// - [`Error::InvalidVest`] for an unknown vest
    pub fn owner_of(env: Env, vest_id: u64) -> Result<Address, Error> {
        Self::beneficiary(&env, vest_id)
    }

    /// Move the claim right of a vest, and with it the beneficiary role.
    ///
    /// # Errors
    /// - [`Error::NotClaimHolder`] if `from` does not hold the claim right
    pub fn transfer_claim(env: Env, from: Address, to: Address, vest_id: u64) -> Result<(), Error> {
        from.require_auth();
        claim::transfer(&env, vest_id, &from, &to)
    }

    /// Withdraw everything vested so far to the claim holder.
    ///
    /// Returns the shares paid, possibly zero. A non-empty `task_payload` is
    /// delivered to the holder's `on_task_received` hook after the payout.
    ///
    /// # Errors
    /// - [`Error::InvalidVest`] for an unknown vest
    /// - [`Error::NotVestReceiver`] if the caller does not hold the claim right
    /// - [`Error::TaskFailed`] if the hook fails under [`TaskPolicy::Required`]
    pub fn withdraw(
        env: Env,
        caller: Address,
        vest_id: u64,
        task_payload: Bytes,
        to_vault_balance: bool,
    ) -> Result<i128, Error> {
        caller.require_auth();
        Self::withdraw_as(
            &env,
            &caller,
            VestWithdrawParams {
                vest_id,
                task_payload,
                to_vault_balance,
            },
        )
    }

    /// Stop a vest and settle it. Fund owner only.
    ///
    /// The beneficiary is paid what has vested and not been withdrawn, the
    /// fund owner gets back everything else. The vest keeps its record with
    /// no fund owner, frozen at the stop time.
    ///
    /// # Errors
    /// - [`Error::InvalidVest`] for an unknown vest
    /// - [`Error::NotOwner`] if the caller is not the fund owner, including
    ///   any call on an already stopped vest
    ///
    /// # Events
    /// - `stopped(vest_id)` with `(funder_shares, beneficiary_shares)`
    pub fn stop_vesting(
        env: Env,
        caller: Address,
        vest_id: u64,
        to_vault_balance: bool,
    ) -> Result<Settlement, Error> {
        caller.require_auth();
        Self::stop_as(
            &env,
            &caller,
            StopParams {
                vest_id,
                to_vault_balance,
            },
        )
    }

    /// Hand the fund owner role of a vest to `new_owner`. Fund owner only.
    pub fn update_owner(
        env: Env,
        caller: Address,
        vest_id: u64,
        new_owner: Address,
    ) -> Result<(), Error> {
        caller.require_auth();
        Self::update_owner_as(&env, &caller, UpdateOwnerParams { vest_id, new_owner })
    }

    /// Forward `user`'s signed operator approval of this engine to the vault.
    ///
    /// The signature is the authorization; the vault checks it and the nonce.
    ///
    /// # Errors
    /// - [`Error::ApprovalRejected`] if the vault refuses the approval
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

    /// Run several operations as `caller` in one invocation. Same failure
    /// policy as the stream engine's batch.
    pub fn batch(
        env: Env,
        caller: Address,
        calls: Vec<VestCall>,
        revert_on_fail: bool,
    ) -> Result<Vec<CallOutcome>, Error> {
        caller.require_auth();
        batch::execute(&env, calls, revert_on_fail, |call| {
            Self::dispatch(&env, &caller, call)
        })
    }
}

#[contractimpl]
impl TidepoolVesting {
    /// Choose what a failing automation hook does to a withdrawal. Owner only.
    ///
    /// # Errors
    /// - [`Error::NotOwner`] if the engine has no owner
    pub fn set_task_policy(env: Env, policy: TaskPolicy) -> Result<(), Error> {
        admin::require_owner(&env)?;
        let mut config = get_config(&env);
        config.task_policy = policy;
        set_config(&env, &config);
        Ok(())
    }

    /// Hand over engine ownership. See [`admin::transfer_ownership`].
    ///
    /// # Errors
    /// - [`Error::NotOwner`] if the engine has no owner
    /// - [`Error::InvalidAddressZero`] for a direct transfer to `None`
    ///   without `renounce`
    pub fn transfer_ownership(
        env: Env,
        new_owner: Option<Address>,
        direct: bool,
        renounce: bool,
    ) -> Result<(), Error> {
        admin::transfer_ownership(&env, new_owner, direct, renounce)
    }

    /// Accept a pending ownership transfer.
    ///
    /// # Errors
    /// - [`Error::NotPendingOwner`] if `caller` is not the pending owner
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

#[cfg(test)]
mod test;

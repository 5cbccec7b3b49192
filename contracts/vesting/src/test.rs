#[cfg(test)]
extern crate std;

use soroban_sdk::{
    symbol_short,
    testutils::{Address as _, Events, Ledger},
    token::{Client as TokenClient, StellarAssetClient},
    vec, Address, Bytes, BytesN, Env, IntoVal, Val, Vec,
};
use tidepool_common::{
    batch::{CallOutcome, CallValue, Settlement, VaultApproval},
    hooks::TaskPolicy,
    testutils::{
        public_key, sign_approval, MockTasker, MockTaskerClient, MockVault, MockVaultClient,
        SigningKey,
    },
    vault::VaultClient,
    Error,
};

use crate::{
    StopParams, TidepoolVesting, TidepoolVestingClient, UpdateOwnerParams, VestCall, VestParams,
    VestWithdrawParams, FIRST_VEST_ID,
};

const NOW: u64 = 1_000;
const START: u64 = 2_000;
const YEAR: u64 = 365 * 24 * 60 * 60;
const MONTH: u64 = 30 * 24 * 60 * 60;
const CLIFF: u64 = START + YEAR;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct TestContext {
    env: Env,
    contract_id: Address,
    vault_id: Address,
    asset: Address,
    owner: Address,
    sender: Address,
    recipient: Address,
}

impl TestContext {
    /// Sender holds 80 000 in their wallet and 20 000 shares in the vault, and
    /// has approved the engine as a vault operator.
    fn setup() -> Self {
        let env = Env::default();
        env.mock_all_auths();
        env.ledger().set_timestamp(NOW);

        let vault_id = env.register_contract(None, MockVault);
        let contract_id = env.register_contract(None, TidepoolVesting);

        let token_admin = Address::generate(&env);
        let asset = env
            .register_stellar_asset_contract_v2(token_admin)
            .address();

        let owner = Address::generate(&env);
        let sender = Address::generate(&env);
        let recipient = Address::generate(&env);

        TidepoolVestingClient::new(&env, &contract_id).init(&vault_id, &owner);

        StellarAssetClient::new(&env, &asset).mint(&sender, &100_000_i128);
        VaultClient::new(&env, &vault_id).deposit(&sender, &asset, &sender, &sender, &20_000, &0);
        MockVaultClient::new(&env, &vault_id).approve(&sender, &contract_id, &true);

        TestContext {
            env,
            contract_id,
            vault_id,
            asset,
            owner,
            sender,
            recipient,
        }
    }

    fn client(&self) -> TidepoolVestingClient<'_> {
        TidepoolVestingClient::new(&self.env, &self.contract_id)
    }

    fn vault(&self) -> VaultClient<'_> {
        VaultClient::new(&self.env, &self.vault_id)
    }

    fn token(&self) -> TokenClient<'_> {
        TokenClient::new(&self.env, &self.asset)
    }

    fn at(&self, timestamp: u64) {
        self.env.ledger().set_timestamp(timestamp);
    }

    fn vault_shares(&self, owner: &Address) -> i128 {
        self.vault().balance_of(&self.asset, owner)
    }

    /// One-year cliff of 100, then three monthly steps of 50.
    fn params(&self) -> VestParams {
        VestParams {
            asset: self.asset.clone(),
            recipient: self.recipient.clone(),
            start_time: START,
            cliff_duration: YEAR,
            step_duration: MONTH,
            steps: 3,
            cliff_amount: 100,
            step_amount: 50,
            from_vault_balance: false,
        }
    }

    fn create_default_vest(&self) -> u64 {
        self.client().create_vesting(&self.sender, &self.params())
    }

    fn withdraw(&self, caller: &Address, vest_id: u64) -> i128 {
        self.client()
            .withdraw(caller, &vest_id, &Bytes::new(&self.env), &false)
    }
}

// ---------------------------------------------------------------------------
// Tests — init
// ---------------------------------------------------------------------------

#[test]
fn test_init_sets_config() {
    let ctx = TestContext::setup();

    assert_eq!(ctx.client().get_config().vault, ctx.vault_id);
    assert_eq!(ctx.client().get_config().task_policy, TaskPolicy::BestEffort);
    assert_eq!(ctx.client().owner(), Some(ctx.owner.clone()));
    assert_eq!(ctx.client().vest_ids(), FIRST_VEST_ID);
}

#[test]
#[should_panic(expected = "already initialised")]
fn test_init_twice_panics() {
    let ctx = TestContext::setup();
    ctx.client().init(&ctx.vault_id, &ctx.owner);
}

// ---------------------------------------------------------------------------
// Tests — create_vesting
// ---------------------------------------------------------------------------

#[test]
fn test_create_vesting_from_wallet() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();

    assert_eq!(vest_id, 1);
    assert_eq!(ctx.client().vest_ids(), 2);

    let vest = ctx.client().get_vest(&vest_id);
    assert_eq!(vest.fund_owner, Some(ctx.sender.clone()));
    assert_eq!(vest.deposited_shares, 250);
    assert_eq!(vest.cliff_shares, 100);
    assert_eq!(vest.step_shares, 50);
    assert_eq!(vest.steps, 3);
    assert_eq!(vest.withdrawn_shares, 0);
    assert_eq!(vest.stopped_at, None);

    assert_eq!(ctx.client().owner_of(&vest_id), ctx.recipient);
    assert_eq!(ctx.vault_shares(&ctx.contract_id), 250);
    assert_eq!(ctx.token().balance(&ctx.sender), 79_750);

    let events = ctx.env.events().all();
    let (_, topics, _) = events.last().unwrap();
    let expected: Vec<Val> = (symbol_short!("vested"), vest_id).into_val(&ctx.env);
    assert_eq!(topics, expected);
}

#[test]
fn test_create_vesting_from_vault_balance() {
    let ctx = TestContext::setup();
    let mut params = ctx.params();
    params.from_vault_balance = true;

    ctx.client().create_vesting(&ctx.sender, &params);

    assert_eq!(ctx.vault_shares(&ctx.sender), 19_750);
    assert_eq!(ctx.vault_shares(&ctx.contract_id), 250);
    assert_eq!(ctx.token().balance(&ctx.sender), 80_000);
}

#[test]
fn test_create_vesting_converts_amounts_to_shares() {
    let ctx = TestContext::setup();
    let donor = Address::generate(&ctx.env);
    StellarAssetClient::new(&ctx.env, &ctx.asset).mint(&donor, &20_000_i128);
    // 20 000 shares now back 40 000 tokens.
    MockVaultClient::new(&ctx.env, &ctx.vault_id).donate(&ctx.asset, &donor, &20_000);

    let vest_id = ctx.create_default_vest();
    let vest = ctx.client().get_vest(&vest_id);

    assert_eq!(vest.cliff_shares, 50);
    assert_eq!(vest.step_shares, 25);
    assert_eq!(vest.deposited_shares, 125);
    assert_eq!(ctx.token().balance(&ctx.sender), 79_750);

    ctx.at(CLIFF + 3 * MONTH);
    assert_eq!(ctx.withdraw(&ctx.recipient, vest_id), 125);
    assert_eq!(ctx.token().balance(&ctx.recipient), 250);
}

#[test]
fn test_create_vesting_validation() {
    let ctx = TestContext::setup();
    let client = ctx.client();

    let mut starts_now = ctx.params();
    starts_now.start_time = NOW;
    assert_eq!(
        client.try_create_vesting(&ctx.sender, &starts_now),
        Err(Ok(Error::InvalidStart))
    );

    let mut cliff_overflows = ctx.params();
    cliff_overflows.start_time = u64::MAX - 10;
    assert_eq!(
        client.try_create_vesting(&ctx.sender, &cliff_overflows),
        Err(Ok(Error::InvalidStart))
    );

    let mut no_step_duration = ctx.params();
    no_step_duration.step_duration = 0;
    assert_eq!(
        client.try_create_vesting(&ctx.sender, &no_step_duration),
        Err(Ok(Error::InvalidStepSetting))
    );

    let mut negative = ctx.params();
    negative.cliff_amount = -1;
    assert_eq!(
        client.try_create_vesting(&ctx.sender, &negative),
        Err(Ok(Error::InvalidAmount))
    );

    let mut empty = ctx.params();
    empty.cliff_amount = 0;
    empty.step_amount = 0;
    assert_eq!(
        client.try_create_vesting(&ctx.sender, &empty),
        Err(Ok(Error::InvalidAmount))
    );

    assert_eq!(client.vest_ids(), FIRST_VEST_ID);
    assert_eq!(ctx.vault_shares(&ctx.contract_id), 0);
}

#[test]
fn test_create_cliff_only_vesting() {
    let ctx = TestContext::setup();
    let mut params = ctx.params();
    params.steps = 0;
    params.step_duration = 0;

    let vest_id = ctx.client().create_vesting(&ctx.sender, &params);
    assert_eq!(ctx.client().get_vest(&vest_id).deposited_shares, 100);

    ctx.at(CLIFF);
    assert_eq!(ctx.client().vest_balance(&vest_id), 100);
}

// ---------------------------------------------------------------------------
// Tests — vest_balance and withdraw
// ---------------------------------------------------------------------------

#[test]
fn test_vest_balance_steps() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    let balance_at = |timestamp: u64| {
        ctx.at(timestamp);
        ctx.client().vest_balance(&vest_id)
    };

    assert_eq!(balance_at(START + 1), 0);
    assert_eq!(balance_at(CLIFF - 1), 0);
    assert_eq!(balance_at(CLIFF), 100);
    assert_eq!(balance_at(CLIFF + MONTH - 1), 100);
    assert_eq!(balance_at(CLIFF + MONTH), 150);
    assert_eq!(balance_at(CLIFF + 2 * MONTH), 200);
    assert_eq!(balance_at(CLIFF + 3 * MONTH), 250);
    assert_eq!(balance_at(CLIFF + 12 * MONTH), 250);
}

#[test]
fn test_withdraw_in_two_rounds() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();

    ctx.at(CLIFF + MONTH);
    assert_eq!(ctx.withdraw(&ctx.recipient, vest_id), 150);
    assert_eq!(ctx.client().vest_balance(&vest_id), 0);
    assert_eq!(ctx.withdraw(&ctx.recipient, vest_id), 0);

    ctx.at(CLIFF + 5 * MONTH);
    assert_eq!(ctx.withdraw(&ctx.recipient, vest_id), 100);

    assert_eq!(ctx.token().balance(&ctx.recipient), 250);
    assert_eq!(ctx.client().get_vest(&vest_id).withdrawn_shares, 250);
    assert_eq!(ctx.vault_shares(&ctx.contract_id), 0);
}

#[test]
fn test_withdraw_before_cliff_pays_nothing() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();

    ctx.at(CLIFF - 1);
    assert_eq!(ctx.withdraw(&ctx.recipient, vest_id), 0);
    assert_eq!(ctx.token().balance(&ctx.recipient), 0);
}

#[test]
fn test_withdraw_to_vault_balance() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    ctx.at(CLIFF);

    let paid = ctx
        .client()
        .withdraw(&ctx.recipient, &vest_id, &Bytes::new(&ctx.env), &true);

    assert_eq!(paid, 100);
    assert_eq!(ctx.vault_shares(&ctx.recipient), 100);
}

#[test]
fn test_withdraw_only_by_claim_holder() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    ctx.at(CLIFF);

    let by_funder = ctx
        .client()
        .try_withdraw(&ctx.sender, &vest_id, &Bytes::new(&ctx.env), &false);
    assert_eq!(by_funder, Err(Ok(Error::NotVestReceiver)));

    let heir = Address::generate(&ctx.env);
    ctx.client().transfer_claim(&ctx.recipient, &heir, &vest_id);

    let by_old_holder = ctx
        .client()
        .try_withdraw(&ctx.recipient, &vest_id, &Bytes::new(&ctx.env), &false);
    assert_eq!(by_old_holder, Err(Ok(Error::NotVestReceiver)));

    assert_eq!(ctx.withdraw(&heir, vest_id), 100);
    assert_eq!(ctx.token().balance(&heir), 100);
}

#[test]
fn test_unknown_vest() {
    let ctx = TestContext::setup();
    let client = ctx.client();

    assert_eq!(client.try_get_vest(&7), Err(Ok(Error::InvalidVest)));
    assert_eq!(client.try_vest_balance(&7), Err(Ok(Error::InvalidVest)));
    assert_eq!(client.try_owner_of(&7), Err(Ok(Error::InvalidVest)));
    assert_eq!(
        client.try_withdraw(&ctx.recipient, &7, &Bytes::new(&ctx.env), &false),
        Err(Ok(Error::InvalidVest))
    );
    assert_eq!(
        client.try_stop_vesting(&ctx.sender, &7, &false),
        Err(Ok(Error::InvalidVest))
    );
}

// ---------------------------------------------------------------------------
// Tests — stop_vesting
// ---------------------------------------------------------------------------

#[test]
fn test_stop_two_months_after_cliff() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    ctx.at(CLIFF + 2 * MONTH);

    let settlement = ctx.client().stop_vesting(&ctx.sender, &vest_id, &false);

    assert_eq!(
        settlement,
        Settlement {
            funder_shares: 50,
            beneficiary_shares: 200,
        }
    );
    assert_eq!(ctx.token().balance(&ctx.recipient), 200);
    assert_eq!(ctx.token().balance(&ctx.sender), 79_800);
    assert_eq!(ctx.vault_shares(&ctx.contract_id), 0);

    let vest = ctx.client().get_vest(&vest_id);
    assert_eq!(vest.fund_owner, None);
    assert_eq!(vest.stopped_at, Some(CLIFF + 2 * MONTH));
}

#[test]
fn test_stopped_vest_is_terminal() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    ctx.at(CLIFF + 2 * MONTH);
    ctx.client().stop_vesting(&ctx.sender, &vest_id, &false);

    ctx.at(CLIFF + 6 * MONTH);
    assert_eq!(ctx.client().vest_balance(&vest_id), 0);
    assert_eq!(ctx.withdraw(&ctx.recipient, vest_id), 0);

    assert_eq!(
        ctx.client().try_stop_vesting(&ctx.sender, &vest_id, &false),
        Err(Ok(Error::NotOwner))
    );
    assert_eq!(
        ctx.client()
            .try_update_owner(&ctx.sender, &vest_id, &ctx.sender),
        Err(Ok(Error::NotOwner))
    );
}

#[test]
fn test_stop_after_partial_withdrawal() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();

    ctx.at(CLIFF);
    ctx.withdraw(&ctx.recipient, vest_id);

    ctx.at(CLIFF + MONTH);
    let settlement = ctx.client().stop_vesting(&ctx.sender, &vest_id, &true);

    assert_eq!(settlement.beneficiary_shares, 50);
    assert_eq!(settlement.funder_shares, 100);
    assert_eq!(ctx.token().balance(&ctx.recipient), 100);
    assert_eq!(ctx.vault_shares(&ctx.recipient), 50);
    assert_eq!(ctx.vault_shares(&ctx.sender), 20_100);
}

#[test]
fn test_stop_before_cliff_refunds_everything() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();

    let settlement = ctx.client().stop_vesting(&ctx.sender, &vest_id, &false);
    assert_eq!(settlement.funder_shares, 250);
    assert_eq!(settlement.beneficiary_shares, 0);
    assert_eq!(ctx.token().balance(&ctx.sender), 80_000);
}

#[test]
fn test_stop_by_beneficiary_fails() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();

    assert_eq!(
        ctx.client().try_stop_vesting(&ctx.recipient, &vest_id, &false),
        Err(Ok(Error::NotOwner))
    );
}

#[test]
fn test_update_owner_hands_over_stop_right() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    let treasury = Address::generate(&ctx.env);

    ctx.client().update_owner(&ctx.sender, &vest_id, &treasury);
    assert_eq!(ctx.client().get_vest(&vest_id).fund_owner, Some(treasury.clone()));

    assert_eq!(
        ctx.client().try_stop_vesting(&ctx.sender, &vest_id, &false),
        Err(Ok(Error::NotOwner))
    );
    assert_eq!(
        ctx.client()
            .try_update_owner(&ctx.recipient, &vest_id, &ctx.recipient),
        Err(Ok(Error::NotOwner))
    );

    ctx.client().stop_vesting(&treasury, &vest_id, &false);
    assert_eq!(ctx.token().balance(&treasury), 250);
}

// ---------------------------------------------------------------------------
// Tests — automation hook
// ---------------------------------------------------------------------------

#[test]
fn test_withdraw_notifies_holder_hook() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    let tasker = ctx.env.register_contract(None, MockTasker);
    ctx.client().transfer_claim(&ctx.recipient, &tasker, &vest_id);
    ctx.at(CLIFF);

    let payload = Bytes::from_slice(&ctx.env, b"restake");
    ctx.client().withdraw(&tasker, &vest_id, &payload, &true);

    let tasker_client = MockTaskerClient::new(&ctx.env, &tasker);
    assert_eq!(tasker_client.calls(), 1);
    assert_eq!(tasker_client.last_payload(), payload);
    assert_eq!(ctx.vault_shares(&tasker), 100);
}

#[test]
fn test_failing_hook_policies() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();
    let tasker = ctx.env.register_contract(None, MockTasker);
    MockTaskerClient::new(&ctx.env, &tasker).set_failing(&true);
    ctx.client().transfer_claim(&ctx.recipient, &tasker, &vest_id);
    let payload = Bytes::from_slice(&ctx.env, b"restake");

    ctx.client().set_task_policy(&TaskPolicy::Required);
    ctx.at(CLIFF);
    assert_eq!(
        ctx.client().try_withdraw(&tasker, &vest_id, &payload, &true),
        Err(Ok(Error::TaskFailed))
    );
    assert_eq!(ctx.client().get_vest(&vest_id).withdrawn_shares, 0);

    ctx.client().set_task_policy(&TaskPolicy::BestEffort);
    assert_eq!(ctx.client().withdraw(&tasker, &vest_id, &payload, &true), 100);
    assert_eq!(ctx.vault_shares(&tasker), 100);
}

// ---------------------------------------------------------------------------
// Tests — batch
// ---------------------------------------------------------------------------

#[test]
fn test_batch_signed_approval_then_create() {
    let ctx = TestContext::setup();
    let alice = Address::generate(&ctx.env);
    let key = SigningKey::from_bytes(&[11u8; 32]);
    let mock_vault = MockVaultClient::new(&ctx.env, &ctx.vault_id);

    StellarAssetClient::new(&ctx.env, &ctx.asset).mint(&alice, &1_000_i128);
    ctx.vault()
        .deposit(&alice, &ctx.asset, &alice, &alice, &1_000, &0);
    mock_vault.register_signer(&alice, &public_key(&ctx.env, &key));

    let approval = VaultApproval {
        user: alice.clone(),
        approved: true,
        nonce: 0,
        signature: sign_approval(
            &ctx.env,
            &key,
            &ctx.vault_id,
            &alice,
            &ctx.contract_id,
            true,
            0,
        ),
    };
    let mut params = ctx.params();
    params.from_vault_balance = true;

    let outcomes = ctx.client().batch(
        &alice,
        &vec![
            &ctx.env,
            VestCall::VaultApproval(approval),
            VestCall::CreateVesting(params),
        ],
        &true,
    );

    assert_eq!(
        outcomes,
        vec![
            &ctx.env,
            CallOutcome::Done(CallValue::Unit),
            CallOutcome::Done(CallValue::Id(1)),
        ]
    );
    assert_eq!(ctx.vault_shares(&alice), 750);
    assert_eq!(ctx.client().get_vest(&1).fund_owner, Some(alice));
}

#[test]
fn test_batch_without_revert_reports_each_call() {
    let ctx = TestContext::setup();
    let mut late = ctx.params();
    late.start_time = NOW;

    let outcomes = ctx.client().batch(
        &ctx.sender,
        &vec![
            &ctx.env,
            VestCall::CreateVesting(ctx.params()),
            VestCall::CreateVesting(late),
            VestCall::Withdraw(VestWithdrawParams {
                vest_id: 1,
                task_payload: Bytes::new(&ctx.env),
                to_vault_balance: false,
            }),
            VestCall::Stop(StopParams {
                vest_id: 1,
                to_vault_balance: true,
            }),
        ],
        &false,
    );

    assert_eq!(
        outcomes,
        vec![
            &ctx.env,
            CallOutcome::Done(CallValue::Id(1)),
            CallOutcome::Failed(Error::InvalidStart as u32),
            CallOutcome::Failed(Error::NotVestReceiver as u32),
            CallOutcome::Done(CallValue::Settlement(Settlement {
                funder_shares: 250,
                beneficiary_shares: 0,
            })),
        ]
    );
    assert_eq!(ctx.vault_shares(&ctx.sender), 20_250);
}

#[test]
fn test_batch_revert_on_fail_rolls_back_created_vest() {
    let ctx = TestContext::setup();

    let result = ctx.client().try_batch(
        &ctx.sender,
        &vec![
            &ctx.env,
            VestCall::CreateVesting(ctx.params()),
            VestCall::UpdateOwner(UpdateOwnerParams {
                vest_id: 99,
                new_owner: ctx.owner.clone(),
            }),
        ],
        &true,
    );

    assert_eq!(result, Err(Ok(Error::InvalidVest)));
    assert_eq!(ctx.client().vest_ids(), FIRST_VEST_ID);
    assert_eq!(ctx.token().balance(&ctx.sender), 80_000);
}

// ---------------------------------------------------------------------------
// Tests — admin and authorization
// ---------------------------------------------------------------------------

#[test]
fn test_renounced_engine_rejects_owner_calls() {
    let ctx = TestContext::setup();
    let client = ctx.client();

    assert_eq!(
        client.try_transfer_ownership(&None, &true, &false),
        Err(Ok(Error::InvalidAddressZero))
    );
    client.transfer_ownership(&None, &true, &true);

    assert_eq!(client.owner(), None);
    assert_eq!(
        client.try_set_task_policy(&TaskPolicy::Required),
        Err(Ok(Error::NotOwner))
    );
}

#[test]
fn test_two_step_ownership_and_rejected_approval() {
    let ctx = TestContext::setup();
    let client = ctx.client();
    let next = Address::generate(&ctx.env);

    client.transfer_ownership(&Some(next.clone()), &false, &false);
    assert_eq!(client.pending_owner(), Some(next.clone()));
    assert_eq!(
        client.try_claim_ownership(&ctx.sender),
        Err(Ok(Error::NotPendingOwner))
    );
    client.claim_ownership(&next);
    assert_eq!(client.owner(), Some(next));

    let unsigned = client.try_set_vault_approval(
        &ctx.sender,
        &true,
        &0,
        &BytesN::from_array(&ctx.env, &[0u8; 64]),
    );
    assert_eq!(unsigned, Err(Ok(Error::ApprovalRejected)));
}

#[test]
#[should_panic]
fn test_create_vesting_without_caller_auth_panics() {
    let ctx = TestContext::setup();

    ctx.env.mock_auths(&[]);
    ctx.create_default_vest();
}

#[test]
#[should_panic]
fn test_stop_vesting_without_caller_auth_panics() {
    let ctx = TestContext::setup();
    let vest_id = ctx.create_default_vest();

    ctx.env.mock_auths(&[]);
    ctx.client().stop_vesting(&ctx.sender, &vest_id, &false);
}

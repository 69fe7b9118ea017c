//! End-to-end ledger behaviour over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rewards_ledger::amount::Amount;
use rewards_ledger::auth::Caller;
use rewards_ledger::config::LedgerConfig;
use rewards_ledger::currency::CurrencyConverter;
use rewards_ledger::error::LedgerError;
use rewards_ledger::model::{AccountId, Decision, WithdrawalStatus};
use rewards_ledger::store::{LedgerStore, MemoryStore};
use rewards_ledger::util::time_source::SharedMockTimeSource;
use rewards_ledger::withdrawal::WithdrawalRequest;
use rewards_ledger::Ledger;
use testresult::TestResult;

struct Harness {
    ledger: Arc<Ledger>,
    store: Arc<MemoryStore>,
    time: SharedMockTimeSource,
}

fn harness(configure: impl FnOnce(&mut LedgerConfig)) -> Harness {
    let mut config = LedgerConfig::default();
    configure(&mut config);
    let store = Arc::new(MemoryStore::new());
    let time = SharedMockTimeSource::new();
    let ledger = Ledger::new(&config, store.clone(), Arc::new(time.clone())).expect("valid config");
    Harness {
        ledger: Arc::new(ledger),
        store,
        time,
    }
}

/// Ledger paying `reward` per ad with no reward cooldown.
fn paying(reward: Amount) -> Harness {
    harness(|config| {
        config.rewards.amount = reward;
        config.rewards.cooldown = Duration::ZERO;
    })
}

impl Harness {
    async fn funded(&self, id: &str, credits: usize) -> Result<AccountId, LedgerError> {
        let id = AccountId::from(id);
        self.ledger.ensure_account(&id).await?;
        for _ in 0..credits {
            self.ledger.rewards().credit_reward(&id).await?;
        }
        Ok(id)
    }

    async fn balance(&self, id: &AccountId) -> Result<Amount, LedgerError> {
        Ok(self.ledger.account(id).await?.balance)
    }
}

fn crypto(amount: f64) -> WithdrawalRequest {
    WithdrawalRequest {
        method_id: "binance".to_string(),
        network_id: "bep20".to_string(),
        amount,
        recipient: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
    }
}

#[tokio::test]
async fn test_withdrawal_at_network_minimum_debits_canonical_amount() -> TestResult {
    let h = paying(Amount::from_whole(10));
    let id = h.funded("alice", 1).await?;
    assert_eq!(h.balance(&id).await?, Amount::from_whole(10));

    let view = h.ledger.withdrawals().request_withdrawal(&id, &crypto(0.5)).await?;

    assert_eq!(view.record.status, WithdrawalStatus::Pending);
    assert_eq!(view.record.amount, Amount::from_units(500_000));
    assert_eq!(h.balance(&id).await?, Amount::from_units(9_500_000));
    assert_eq!(view.display_amount, Amount::from_whole(50));
    Ok(())
}

#[tokio::test]
async fn test_insufficient_balance_leaves_no_trace() -> TestResult {
    let h = harness(|_| {});
    let id = h.funded("bob", 1).await?;
    assert_eq!(h.balance(&id).await?, Amount::from_units(2_000));

    let err = h
        .ledger
        .withdrawals()
        .request_withdrawal(&id, &crypto(0.5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance { available, requested }
            if available == Amount::from_units(2_000) && requested == Amount::from_units(500_000)
    ));
    assert_eq!(h.balance(&id).await?, Amount::from_units(2_000));
    assert!(h.ledger.withdrawals().list(&Caller::user("bob")).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_mobile_money_recipient_normalization() -> TestResult {
    let h = paying(Amount::from_whole(1));
    let id = h.funded("carol", 2).await?;

    let mut request = WithdrawalRequest {
        method_id: "bkash".to_string(),
        network_id: "personal".to_string(),
        amount: 100.0,
        recipient: "+8801511234567".to_string(),
    };
    let view = h.ledger.withdrawals().request_withdrawal(&id, &request).await?;
    assert_eq!(view.record.recipient, "1511234567");

    request.recipient = "1511234".to_string();
    assert!(matches!(
        h.ledger.withdrawals().request_withdrawal(&id, &request).await,
        Err(LedgerError::InvalidRecipient { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_reward_cooldown_timeline() -> TestResult {
    let h = harness(|_| {});
    let id = AccountId::from("dave");
    let account = h.ledger.ensure_account(&id).await?;
    assert_eq!(account.ads_watched, 0);

    let first = h.ledger.rewards().credit_reward(&id).await?;
    assert_eq!(first.new_balance, Amount::from_units(2_000));
    assert_eq!(first.ads_watched, 1);

    h.time.advance_time(Duration::from_secs(10));
    assert!(matches!(
        h.ledger.rewards().credit_reward(&id).await,
        Err(LedgerError::RateLimited { .. })
    ));
    assert_eq!(h.balance(&id).await?, Amount::from_units(2_000));

    h.time.advance_time(Duration::from_secs(6));
    let second = h.ledger.rewards().credit_reward(&id).await?;
    assert_eq!(second.new_balance, Amount::from_units(4_000));
    assert_eq!(h.ledger.earnings(&id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_rejection_conserves_balance() -> TestResult {
    let h = paying(Amount::from_whole(3));
    let id = h.funded("erin", 1).await?;
    let before = h.balance(&id).await?;

    let view = h.ledger.withdrawals().request_withdrawal(&id, &crypto(2.0)).await?;
    let admin = Caller::admin("ops");
    let rejected = h
        .ledger
        .withdrawals()
        .decide(&admin, view.record.id, Decision::Rejected)
        .await?;
    assert_eq!(rejected.record.status, WithdrawalStatus::Rejected);
    assert_eq!(h.balance(&id).await?, before);

    for attempt in [Decision::Rejected, Decision::Approved] {
        assert!(matches!(
            h.ledger.withdrawals().decide(&admin, view.record.id, attempt).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }
    assert!(matches!(
        h.ledger.withdrawals().cancel(&Caller::user("erin"), view.record.id).await,
        Err(LedgerError::InvalidTransition { .. })
    ));
    assert_eq!(h.balance(&id).await?, before);
    Ok(())
}

#[tokio::test]
async fn test_timing_follows_latest_withdrawal() -> TestResult {
    let h = paying(Amount::from_whole(5));
    let id = h.funded("frank", 1).await?;
    assert!(h.ledger.cooldown().can_withdraw(&id).await?.can_withdraw);

    let view = h.ledger.withdrawals().request_withdrawal(&id, &crypto(1.0)).await?;
    let timing = h.ledger.cooldown().can_withdraw(&id).await?;
    assert!(!timing.can_withdraw);
    assert_eq!(timing.last_withdrawal, Some(view.record.created_at));

    h.ledger
        .withdrawals()
        .cancel(&Caller::user("frank"), view.record.id)
        .await?;
    assert!(h.ledger.cooldown().can_withdraw(&id).await?.can_withdraw);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rewards_credit_once_per_window() -> TestResult {
    let h = harness(|_| {});
    let id = h.funded("grace", 0).await?;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let ledger = h.ledger.clone();
            let id = id.clone();
            tokio::spawn(async move { ledger.rewards().credit_reward(&id).await })
        })
        .collect();

    let mut credited = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => credited += 1,
            Err(LedgerError::RateLimited { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(credited, 1);
    let account = h.ledger.account(&id).await?;
    assert_eq!(account.balance, Amount::from_units(2_000));
    assert_eq!(account.ads_watched, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> TestResult {
    let h = harness(|config| {
        config.rewards.amount = Amount::from_whole(1);
        config.rewards.cooldown = Duration::ZERO;
        config.withdrawals.enforce_cooldown = false;
    });
    let id = h.funded("heidi", 5).await?;

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let ledger = h.ledger.clone();
            let id = id.clone();
            tokio::spawn(async move {
                ledger
                    .withdrawals()
                    .request_withdrawal(&id, &crypto(1.0))
                    .await
            })
        })
        .collect();

    let mut opened = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => opened += 1,
            Err(LedgerError::InsufficientBalance { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(opened, 5);
    assert_eq!(h.balance(&id).await?, Amount::ZERO);
    assert_eq!(h.store.withdrawals(Some(&id)).await?.len(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_reject_and_cancel_refund_once() -> TestResult {
    let h = paying(Amount::from_whole(2));
    let id = h.funded("ivan", 1).await?;
    let view = h.ledger.withdrawals().request_withdrawal(&id, &crypto(2.0)).await?;
    assert_eq!(h.balance(&id).await?, Amount::ZERO);

    let reject = {
        let ledger = h.ledger.clone();
        let wid = view.record.id;
        tokio::spawn(async move {
            ledger
                .withdrawals()
                .decide(&Caller::admin("ops"), wid, Decision::Rejected)
                .await
                .map(|_| ())
        })
    };
    let cancel = {
        let ledger = h.ledger.clone();
        let wid = view.record.id;
        tokio::spawn(async move {
            ledger
                .withdrawals()
                .cancel(&Caller::user("ivan"), wid)
                .await
                .map(|_| ())
        })
    };

    let outcomes = [reject.await?, cancel.await?];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Err(LedgerError::InvalidTransition { .. }))));
    assert_eq!(h.balance(&id).await?, Amount::from_whole(2));
    Ok(())
}

#[derive(Debug, Clone)]
enum Step {
    Credit,
    Request(f64),
    Decide(usize, Decision),
    Cancel(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Credit),
        3 => prop::sample::select(vec![0.5, 1.0, 2.5, 7.0]).prop_map(Step::Request),
        2 => (0usize..16, prop_oneof![Just(Decision::Approved), Just(Decision::Rejected)])
            .prop_map(|(pick, decision)| Step::Decide(pick, decision)),
        2 => (0usize..16).prop_map(Step::Cancel),
    ]
}

/// Apply `steps` and check after each one that the balance equals the
/// credited total minus every pending or approved withdrawal.
async fn replay(steps: Vec<Step>) -> Result<(), LedgerError> {
    let h = harness(|config| {
        config.rewards.amount = Amount::from_whole(1);
        config.rewards.cooldown = Duration::ZERO;
        config.withdrawals.enforce_cooldown = false;
    });
    let id = h.funded("judy", 0).await?;
    let owner = Caller::user("judy");
    let admin = Caller::admin("ops");
    let mut credited = Amount::ZERO;
    let mut opened = Vec::new();

    for step in steps {
        let outcome = match step {
            Step::Credit => h.ledger.rewards().credit_reward(&id).await.map(|_| {
                credited = credited.checked_add(Amount::from_whole(1)).unwrap();
            }),
            Step::Request(amount) => h
                .ledger
                .withdrawals()
                .request_withdrawal(&id, &crypto(amount))
                .await
                .map(|view| opened.push(view.record.id)),
            Step::Decide(pick, decision) if !opened.is_empty() => h
                .ledger
                .withdrawals()
                .decide(&admin, opened[pick % opened.len()], decision)
                .await
                .map(|_| ()),
            Step::Cancel(pick) if !opened.is_empty() => h
                .ledger
                .withdrawals()
                .cancel(&owner, opened[pick % opened.len()])
                .await
                .map(|_| ()),
            Step::Decide(..) | Step::Cancel(_) => Ok(()),
        };
        match outcome {
            Ok(())
            | Err(LedgerError::InsufficientBalance { .. })
            | Err(LedgerError::InvalidTransition { .. }) => {}
            Err(other) => return Err(other),
        }

        let held = h
            .store
            .withdrawals(Some(&id))
            .await?
            .iter()
            .filter(|w| {
                matches!(w.status, WithdrawalStatus::Pending | WithdrawalStatus::Approved)
            })
            .fold(Amount::ZERO, |sum, w| sum.checked_add(w.amount).unwrap());
        assert_eq!(Some(h.balance(&id).await?), credited.checked_sub(held));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_balance_matches_credits_minus_held_withdrawals(
        steps in prop::collection::vec(step(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(replay(steps)).unwrap();
    }
}

proptest! {
    #[test]
    fn prop_display_round_trip_within_tolerance(
        units in 0u64..1_000_000_000_000,
        rate in 1u64..100_000,
    ) {
        let converter =
            CurrencyConverter::new("USDT", [("BDT", Amount::from_whole(rate))]).unwrap();
        let tolerance = converter.round_trip_tolerance("BDT").unwrap();
        let entered = Amount::from_units(units);

        let canonical = converter.to_canonical(entered, "BDT").unwrap();
        let back = converter.to_display(canonical, "BDT").unwrap();
        prop_assert!(back.units().abs_diff(entered.units()) <= tolerance);
    }

    #[test]
    fn prop_canonical_is_identity(units in 0u64..u64::MAX / 2) {
        let converter = CurrencyConverter::new("USDT", [("BDT", Amount::from_whole(100))]).unwrap();
        let amount = Amount::from_units(units);
        prop_assert_eq!(converter.to_canonical(amount, "USDT").unwrap(), amount);
        prop_assert_eq!(converter.to_display(amount, "usdt").unwrap(), amount);
    }
}

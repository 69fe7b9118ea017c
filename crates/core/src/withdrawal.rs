//! Withdrawal lifecycle: request (debit), decide, cancel (refund).
//!
//! ```text
//!         request (debit)             approve
//!  (none) ───────────────► pending ───────────► approved
//!                             │
//!                             ├── reject (refund) ──► rejected
//!                             └── cancel (refund) ──► cancelled
//! ```
//!
//! Validation happens entirely before the store is touched. The debit and
//! every status change are single guarded store operations; see
//! [`crate::store`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::amount::Amount;
use crate::auth::Caller;
use crate::catalog::MethodCatalog;
use crate::cooldown::DEFAULT_WITHDRAWAL_COOLDOWN;
use crate::currency::CurrencyConverter;
use crate::error::LedgerError;
use crate::model::{
    AccountId, Decision, WithdrawalId, WithdrawalRecord, WithdrawalStatus,
};
use crate::store::{ChangeOutcome, LedgerStore, NewWithdrawal, OpenOutcome, StatusChange};
use crate::util::time_source::TimeSource;
use crate::validator::{validate_amount, validate_recipient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalPolicy {
    pub cooldown: Duration,
    /// Refuse requests inside the cooldown instead of only reporting it.
    pub enforce_cooldown: bool,
    /// Currency the views convert canonical amounts into.
    pub display_currency: String,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_WITHDRAWAL_COOLDOWN,
            enforce_cooldown: true,
            display_currency: "BDT".to_string(),
        }
    }
}

/// Body of a withdrawal request. `amount` may be a JSON number or a
/// numeric string and is denominated in the network's currency.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    #[serde(alias = "method")]
    pub method_id: String,
    #[serde(alias = "network")]
    pub network_id: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub amount: f64,
    pub recipient: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalView {
    #[serde(flatten)]
    pub record: WithdrawalRecord,
    pub display_amount: Amount,
    pub display_currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub refunded_amount: Amount,
    pub refunded_display_amount: Amount,
    #[serde(rename = "currency")]
    pub display_currency: String,
    pub withdrawal: WithdrawalView,
}

pub struct WithdrawalManager {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<MethodCatalog>,
    converter: Arc<CurrencyConverter>,
    time_source: Arc<dyn TimeSource>,
    policy: WithdrawalPolicy,
}

impl WithdrawalManager {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<MethodCatalog>,
        converter: Arc<CurrencyConverter>,
        time_source: Arc<dyn TimeSource>,
        policy: WithdrawalPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            converter,
            time_source,
            policy,
        }
    }

    pub async fn request_withdrawal(
        &self,
        account_id: &AccountId,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalView, LedgerError> {
        let record = self.prepare(account_id, request)?;
        let requested = record.amount;
        let cooldown = self.policy.enforce_cooldown.then_some(self.policy.cooldown);

        match self
            .store
            .open_withdrawal(NewWithdrawal { record, cooldown })
            .await?
        {
            OpenOutcome::Opened { record, balance } => {
                tracing::info!(
                    account = %account_id,
                    withdrawal = %record.id,
                    method = %record.method_id,
                    network = %record.network_id,
                    amount = %record.amount,
                    balance = %balance,
                    "Withdrawal requested"
                );
                self.view(record)
            }
            OpenOutcome::InsufficientBalance { available } => {
                tracing::debug!(
                    account = %account_id,
                    available = %available,
                    requested = %requested,
                    "Withdrawal refused: insufficient balance"
                );
                Err(LedgerError::InsufficientBalance {
                    available,
                    requested,
                })
            }
            OpenOutcome::CooldownActive { next_eligible_at } => {
                tracing::debug!(
                    account = %account_id,
                    next_eligible_at = %next_eligible_at,
                    "Withdrawal refused: cooldown active"
                );
                Err(LedgerError::CooldownActive { next_eligible_at })
            }
            OpenOutcome::AccountNotFound => Err(LedgerError::AccountNotFound(account_id.clone())),
        }
    }

    /// Resolve, validate, and convert a request into the pending record to
    /// store. Pure with respect to the ledger.
    fn prepare(
        &self,
        account_id: &AccountId,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalRecord, LedgerError> {
        let route = self
            .catalog
            .resolve(&request.method_id, &request.network_id)?;
        let recipient = validate_recipient(&route, &request.recipient)?;
        let entered = validate_amount(route.network, request.amount)?;
        let currency = route.network.currency.clone();
        let amount = self.converter.to_canonical(entered, &currency)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(
                "amount is smaller than the ledger's precision",
            ));
        }

        let now = self.time_source.now();
        Ok(WithdrawalRecord {
            id: WithdrawalId::at(now),
            account_id: account_id.clone(),
            method_id: route.method.id.clone(),
            network_id: route.network.id.clone(),
            amount,
            original_amount: entered,
            currency,
            fee: route.network.fee,
            recipient,
            status: WithdrawalStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Administrative approve/reject of a pending withdrawal.
    pub async fn decide(
        &self,
        caller: &Caller,
        id: WithdrawalId,
        decision: Decision,
    ) -> Result<WithdrawalView, LedgerError> {
        if !caller.is_admin {
            return Err(LedgerError::Unauthorized);
        }
        self.transition(id, decision.status(), None).await
    }

    /// Cancel a pending withdrawal, refunding its canonical amount. Users
    /// may cancel only their own records; admins any.
    pub async fn cancel(
        &self,
        caller: &Caller,
        id: WithdrawalId,
    ) -> Result<Cancellation, LedgerError> {
        let owner = (!caller.is_admin).then(|| caller.account_id.clone());
        let withdrawal = self
            .transition(id, WithdrawalStatus::Cancelled, owner)
            .await?;
        Ok(Cancellation {
            refunded_amount: withdrawal.record.amount,
            refunded_display_amount: withdrawal.display_amount,
            display_currency: withdrawal.display_currency.clone(),
            withdrawal,
        })
    }

    async fn transition(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        owner: Option<AccountId>,
    ) -> Result<WithdrawalView, LedgerError> {
        let change = StatusChange {
            id,
            from: WithdrawalStatus::Pending,
            to,
            owner,
            now: self.time_source.now(),
        };
        match self.store.change_status(change).await? {
            ChangeOutcome::Applied { record, balance } => {
                tracing::info!(
                    withdrawal = %id,
                    account = %record.account_id,
                    status = %record.status,
                    refunded = to.refunds(),
                    balance = %balance,
                    "Withdrawal status changed"
                );
                self.view(record)
            }
            ChangeOutcome::NotFound => Err(LedgerError::NotFound(id)),
            ChangeOutcome::Conflict { current } => {
                tracing::debug!(
                    withdrawal = %id,
                    current = %current,
                    requested = %to,
                    "Withdrawal transition refused"
                );
                Err(LedgerError::InvalidTransition {
                    id,
                    current,
                    requested: to,
                })
            }
        }
    }

    pub async fn withdrawal(
        &self,
        caller: &Caller,
        id: WithdrawalId,
    ) -> Result<WithdrawalView, LedgerError> {
        match self.store.withdrawal(id).await? {
            Some(record) if caller.may_access(&record.account_id) => self.view(record),
            _ => Err(LedgerError::NotFound(id)),
        }
    }

    /// The caller's withdrawals, or every withdrawal for an admin; newest first.
    pub async fn list(&self, caller: &Caller) -> Result<Vec<WithdrawalView>, LedgerError> {
        let filter = (!caller.is_admin).then_some(&caller.account_id);
        self.store
            .withdrawals(filter)
            .await?
            .into_iter()
            .map(|record| self.view(record))
            .collect()
    }

    fn view(&self, record: WithdrawalRecord) -> Result<WithdrawalView, LedgerError> {
        let display_currency = self.policy.display_currency.clone();
        let display_amount = self.converter.to_display(record.amount, &display_currency)?;
        Ok(WithdrawalView {
            record,
            display_amount,
            display_currency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_methods;
    use crate::rewards::{RewardEngine, RewardPolicy};
    use crate::store::MemoryStore;
    use crate::util::time_source::SharedMockTimeSource;

    struct Fixture {
        manager: WithdrawalManager,
        rewards: RewardEngine,
        store: Arc<MemoryStore>,
        time: SharedMockTimeSource,
    }

    async fn fixture(policy: WithdrawalPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let time = SharedMockTimeSource::new();
        let catalog = Arc::new(MethodCatalog::new(default_methods()).unwrap());
        let converter =
            Arc::new(CurrencyConverter::new("USDT", [("BDT", Amount::from_whole(100))]).unwrap());
        let manager = WithdrawalManager::new(
            store.clone(),
            catalog,
            converter,
            Arc::new(time.clone()),
            policy,
        );
        let rewards = RewardEngine::new(
            store.clone(),
            Arc::new(time.clone()),
            RewardPolicy {
                reward: Amount::from_whole(1),
                cooldown: Duration::ZERO,
            },
        );
        Fixture {
            manager,
            rewards,
            store,
            time,
        }
    }

    impl Fixture {
        async fn account_with(&self, id: &str, whole_units: u64) -> AccountId {
            let id = AccountId::from(id);
            self.store.ensure_account(&id, self.time.now()).await.unwrap();
            for _ in 0..whole_units {
                self.rewards.credit_reward(&id).await.unwrap();
            }
            id
        }

        async fn balance(&self, id: &AccountId) -> Amount {
            self.store.account(id).await.unwrap().unwrap().balance
        }
    }

    fn binance(amount: f64) -> WithdrawalRequest {
        WithdrawalRequest {
            method_id: "binance".to_string(),
            network_id: "bep20".to_string(),
            amount,
            recipient: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
        }
    }

    fn bkash(amount: f64) -> WithdrawalRequest {
        WithdrawalRequest {
            method_id: "bkash".to_string(),
            network_id: "personal".to_string(),
            amount,
            recipient: "+8801511234567".to_string(),
        }
    }

    #[tokio::test]
    async fn test_request_stores_canonical_and_entered_amounts() {
        let f = fixture(WithdrawalPolicy::default()).await;
        let id = f.account_with("u1", 3).await;

        let view = f.manager.request_withdrawal(&id, &bkash(150.0)).await.unwrap();
        assert_eq!(view.record.amount, Amount::from_units(1_500_000));
        assert_eq!(view.record.original_amount, Amount::from_whole(150));
        assert_eq!(view.record.currency, "BDT");
        assert_eq!(view.record.recipient, "1511234567");
        assert_eq!(view.record.status, WithdrawalStatus::Pending);
        assert_eq!(view.display_amount, Amount::from_whole(150));
        assert_eq!(f.balance(&id).await, Amount::from_units(1_500_000));
    }

    #[tokio::test]
    async fn test_validation_failures_have_no_side_effects() {
        let f = fixture(WithdrawalPolicy::default()).await;
        let id = f.account_with("u1", 3).await;

        let mut bad_address = binance(1.0);
        bad_address.recipient = "not-an-address".to_string();
        assert!(matches!(
            f.manager.request_withdrawal(&id, &bad_address).await,
            Err(LedgerError::InvalidRecipient { .. })
        ));
        assert!(matches!(
            f.manager.request_withdrawal(&id, &binance(0.1)).await,
            Err(LedgerError::BelowMinimum { .. })
        ));
        assert!(matches!(
            f.manager.request_withdrawal(&id, &bkash(6_000.0)).await,
            Err(LedgerError::AboveMaximum { .. })
        ));
        let mut unknown = binance(1.0);
        unknown.method_id = "paypal".to_string();
        assert!(matches!(
            f.manager.request_withdrawal(&id, &unknown).await,
            Err(LedgerError::UnknownMethod(_))
        ));

        assert_eq!(f.balance(&id).await, Amount::from_whole(3));
        assert!(f.store.withdrawals(Some(&id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_enforced_when_configured() {
        let f = fixture(WithdrawalPolicy::default()).await;
        let id = f.account_with("u1", 5).await;

        f.manager.request_withdrawal(&id, &binance(1.0)).await.unwrap();
        f.time.advance_time(Duration::from_secs(3_600));
        assert!(matches!(
            f.manager.request_withdrawal(&id, &binance(1.0)).await,
            Err(LedgerError::CooldownActive { .. })
        ));

        f.time.advance_time(DEFAULT_WITHDRAWAL_COOLDOWN);
        f.manager.request_withdrawal(&id, &binance(1.0)).await.unwrap();
        assert_eq!(f.balance(&id).await, Amount::from_whole(3));
    }

    #[tokio::test]
    async fn test_cooldown_advisory_when_disabled() {
        let f = fixture(WithdrawalPolicy {
            enforce_cooldown: false,
            ..WithdrawalPolicy::default()
        })
        .await;
        let id = f.account_with("u1", 5).await;
        f.manager.request_withdrawal(&id, &binance(1.0)).await.unwrap();
        f.manager.request_withdrawal(&id, &binance(1.0)).await.unwrap();
        assert_eq!(f.balance(&id).await, Amount::from_whole(3));
    }

    #[tokio::test]
    async fn test_decide_requires_admin_first() {
        let f = fixture(WithdrawalPolicy::default()).await;
        // Even an unknown id yields Unauthorized for a non-admin.
        assert!(matches!(
            f.manager
                .decide(&Caller::user("u1"), WithdrawalId::new(), Decision::Approved)
                .await,
            Err(LedgerError::Unauthorized)
        ));
        assert!(matches!(
            f.manager
                .decide(&Caller::admin("ops"), WithdrawalId::new(), Decision::Approved)
                .await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_approve_keeps_funds_debited() {
        let f = fixture(WithdrawalPolicy::default()).await;
        let id = f.account_with("u1", 2).await;
        let view = f.manager.request_withdrawal(&id, &binance(1.5)).await.unwrap();

        let approved = f
            .manager
            .decide(&Caller::admin("ops"), view.record.id, Decision::Approved)
            .await
            .unwrap();
        assert_eq!(approved.record.status, WithdrawalStatus::Approved);
        assert_eq!(f.balance(&id).await, Amount::from_units(500_000));

        assert!(matches!(
            f.manager
                .decide(&Caller::admin("ops"), view.record.id, Decision::Rejected)
                .await,
            Err(LedgerError::InvalidTransition {
                current: WithdrawalStatus::Approved,
                requested: WithdrawalStatus::Rejected,
                ..
            })
        ));
        assert_eq!(f.balance(&id).await, Amount::from_units(500_000));
    }

    #[tokio::test]
    async fn test_cancel_refunds_and_retains_record() {
        let f = fixture(WithdrawalPolicy::default()).await;
        let id = f.account_with("u1", 2).await;
        let view = f.manager.request_withdrawal(&id, &bkash(100.0)).await.unwrap();
        assert_eq!(f.balance(&id).await, Amount::from_whole(1));

        let cancellation = f
            .manager
            .cancel(&Caller::user("u1"), view.record.id)
            .await
            .unwrap();
        assert_eq!(cancellation.refunded_amount, Amount::from_whole(1));
        assert_eq!(cancellation.refunded_display_amount, Amount::from_whole(100));
        assert_eq!(cancellation.withdrawal.record.status, WithdrawalStatus::Cancelled);
        assert_eq!(f.balance(&id).await, Amount::from_whole(2));

        let kept = f
            .manager
            .withdrawal(&Caller::user("u1"), view.record.id)
            .await
            .unwrap();
        assert_eq!(kept.record.status, WithdrawalStatus::Cancelled);

        assert!(matches!(
            f.manager.cancel(&Caller::user("u1"), view.record.id).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert_eq!(f.balance(&id).await, Amount::from_whole(2));

        // Cancelled records do not hold the cooldown open.
        f.manager.request_withdrawal(&id, &bkash(100.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_other_users_cannot_see_or_cancel() {
        let f = fixture(WithdrawalPolicy::default()).await;
        let id = f.account_with("u1", 2).await;
        f.account_with("u2", 0).await;
        let view = f.manager.request_withdrawal(&id, &binance(1.0)).await.unwrap();

        let intruder = Caller::user("u2");
        assert!(matches!(
            f.manager.cancel(&intruder, view.record.id).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            f.manager.withdrawal(&intruder, view.record.id).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(f.manager.list(&intruder).await.unwrap().is_empty());
        assert_eq!(f.manager.list(&Caller::admin("ops")).await.unwrap().len(), 1);

        f.manager
            .cancel(&Caller::admin("ops"), view.record.id)
            .await
            .unwrap();
        assert_eq!(f.balance(&id).await, Amount::from_whole(2));
    }

    #[test_log::test(tokio::test)]
    async fn test_store_failure_surfaces_as_transient() {
        let f = fixture(WithdrawalPolicy::default()).await;
        let id = f.account_with("u1", 2).await;
        f.store.set_unavailable(true);
        let err = f
            .manager
            .request_withdrawal(&id, &binance(1.0))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        f.store.set_unavailable(false);
        assert_eq!(f.balance(&id).await, Amount::from_whole(2));
    }

    #[test]
    fn test_request_body_accepts_string_amounts_and_aliases() {
        let body = r#"{"method":"bkash","network":"personal","amount":"150",
            "recipient":"01511234567"}"#;
        let parsed: WithdrawalRequest = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.method_id, "bkash");
        assert_eq!(parsed.amount, 150.0);

        let body = r#"{"methodId":"binance","networkId":"bep20","amount":0.5,"recipient":"0x"}"#;
        let parsed: WithdrawalRequest = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.amount, 0.5);
    }
}

//! The assembled ledger: one store and one clock shared by the reward
//! engine, the withdrawal manager and the cooldown gate.

use std::sync::Arc;

use crate::auth::Caller;
use crate::catalog::MethodCatalog;
use crate::config::{ConfigError, LedgerConfig};
use crate::cooldown::CooldownGate;
use crate::error::LedgerError;
use crate::model::{Account, AccountId, EarningRecord, LedgerStats};
use crate::rewards::RewardEngine;
use crate::store::LedgerStore;
use crate::util::time_source::TimeSource;
use crate::withdrawal::WithdrawalManager;

/// Window for the "new accounts" counter in [`Ledger::stats`], in seconds.
const NEW_ACCOUNT_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Upper bound on a top-earners request.
pub const MAX_TOP_EARNERS: usize = 100;

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    time_source: Arc<dyn TimeSource>,
    catalog: Arc<MethodCatalog>,
    rewards: RewardEngine,
    withdrawals: WithdrawalManager,
    cooldown: CooldownGate,
}

impl Ledger {
    pub fn new(
        config: &LedgerConfig,
        store: Arc<dyn LedgerStore>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        let converter = Arc::new(config.converter()?);
        let catalog = Arc::new(config.catalog(&converter)?);

        let rewards = RewardEngine::new(store.clone(), time_source.clone(), config.reward_policy());
        let withdrawals = WithdrawalManager::new(
            store.clone(),
            catalog.clone(),
            converter.clone(),
            time_source.clone(),
            config.withdrawal_policy(),
        );
        let cooldown = CooldownGate::new(
            store.clone(),
            time_source.clone(),
            config.withdrawals.cooldown,
        );

        tracing::info!(
            methods = catalog.active_methods().len(),
            canonical = converter.canonical(),
            reward = %config.rewards.amount,
            reward_cooldown_secs = config.rewards.cooldown.as_secs(),
            withdrawal_cooldown_secs = config.withdrawals.cooldown.as_secs(),
            enforce_withdrawal_cooldown = config.withdrawals.enforce_cooldown,
            "Ledger initialised"
        );

        Ok(Self {
            store,
            time_source,
            catalog,
            rewards,
            withdrawals,
            cooldown,
        })
    }

    pub fn rewards(&self) -> &RewardEngine {
        &self.rewards
    }

    pub fn withdrawals(&self) -> &WithdrawalManager {
        &self.withdrawals
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }

    pub fn catalog(&self) -> &MethodCatalog {
        &self.catalog
    }

    /// Fetch the caller's account, creating it on first sight.
    pub async fn ensure_account(&self, id: &AccountId) -> Result<Account, LedgerError> {
        Ok(self.store.ensure_account(id, self.time_source.now()).await?)
    }

    pub async fn account(&self, id: &AccountId) -> Result<Account, LedgerError> {
        self.store
            .account(id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))
    }

    pub async fn earnings(&self, id: &AccountId) -> Result<Vec<EarningRecord>, LedgerError> {
        Ok(self.store.earnings(id).await?)
    }

    pub async fn top_earners(&self, limit: usize) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.top_earners(limit.min(MAX_TOP_EARNERS)).await?)
    }

    pub async fn stats(&self, caller: &Caller) -> Result<LedgerStats, LedgerError> {
        if !caller.is_admin {
            return Err(LedgerError::Unauthorized);
        }
        let now = self.time_source.now();
        let since = now
            .checked_sub_signed(chrono::Duration::seconds(NEW_ACCOUNT_WINDOW_SECS))
            .unwrap_or(now);
        Ok(self.store.stats(since).await?)
    }
}

//! Reward accrual: one fixed credit per reported ad watch.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::amount::Amount;
use crate::error::LedgerError;
use crate::model::{AccountId, EarningRecord};
use crate::store::{AccrualOutcome, LedgerStore, RewardAccrual};
use crate::util::time_source::TimeSource;

/// Reward paid per ad watch.
pub const DEFAULT_REWARD: Amount = Amount::from_units(2_000);

/// Minimum interval between two credited ad watches.
pub const DEFAULT_REWARD_COOLDOWN: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardPolicy {
    pub reward: Amount,
    pub cooldown: Duration,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            reward: DEFAULT_REWARD,
            cooldown: DEFAULT_REWARD_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardReceipt {
    pub new_balance: Amount,
    pub reward: Amount,
    pub ads_watched: u64,
    pub earning: EarningRecord,
}

pub struct RewardEngine {
    store: Arc<dyn LedgerStore>,
    time_source: Arc<dyn TimeSource>,
    policy: RewardPolicy,
}

impl RewardEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        time_source: Arc<dyn TimeSource>,
        policy: RewardPolicy,
    ) -> Self {
        Self {
            store,
            time_source,
            policy,
        }
    }

    /// Credit the reward for one ad watch.
    ///
    /// The cooldown check and the credit are a single store operation, so
    /// concurrent reports for one account inside the window yield exactly
    /// one credit.
    pub async fn credit_reward(
        &self,
        account_id: &AccountId,
    ) -> Result<RewardReceipt, LedgerError> {
        let now = self.time_source.now();
        let outcome = self
            .store
            .accrue_reward(RewardAccrual {
                account_id: account_id.clone(),
                reward: self.policy.reward,
                cooldown: self.policy.cooldown,
                now,
            })
            .await?;

        match outcome {
            AccrualOutcome::Credited { account, earning } => {
                tracing::info!(
                    account = %account_id,
                    reward = %self.policy.reward,
                    balance = %account.balance,
                    ads_watched = account.ads_watched,
                    "Reward credited"
                );
                Ok(RewardReceipt {
                    new_balance: account.balance,
                    reward: self.policy.reward,
                    ads_watched: account.ads_watched,
                    earning,
                })
            }
            AccrualOutcome::RateLimited { next_eligible_at } => {
                tracing::debug!(
                    account = %account_id,
                    next_eligible_at = %next_eligible_at,
                    "Reward rate limited"
                );
                Err(LedgerError::RateLimited { next_eligible_at })
            }
            AccrualOutcome::AccountNotFound => {
                Err(LedgerError::AccountNotFound(account_id.clone()))
            }
        }
    }
}

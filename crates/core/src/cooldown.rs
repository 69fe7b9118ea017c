//! Withdrawal cooldown gate.
//!
//! Eligibility is derived from the creation time of the account's latest
//! non-cancelled withdrawal. The same window is what the store enforces at
//! the debit boundary when enforcement is enabled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::LedgerError;
use crate::model::AccountId;
use crate::store::{window_end, LedgerStore};
use crate::util::time_source::TimeSource;

/// Time between two withdrawal requests of one account.
pub const DEFAULT_WITHDRAWAL_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalTiming {
    pub last_withdrawal: Option<DateTime<Utc>>,
    /// Only set while the window is still open.
    pub next_withdrawal: Option<DateTime<Utc>>,
    pub can_withdraw: bool,
}

impl WithdrawalTiming {
    pub fn evaluate(last: Option<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) -> Self {
        let next_withdrawal = last
            .map(|at| window_end(at, window))
            .filter(|next| *next > now);
        Self {
            last_withdrawal: last,
            next_withdrawal,
            can_withdraw: next_withdrawal.is_none(),
        }
    }
}

pub struct CooldownGate {
    store: Arc<dyn LedgerStore>,
    time_source: Arc<dyn TimeSource>,
    window: Duration,
}

impl CooldownGate {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        time_source: Arc<dyn TimeSource>,
        window: Duration,
    ) -> Self {
        Self {
            store,
            time_source,
            window,
        }
    }

    pub async fn can_withdraw(
        &self,
        account_id: &AccountId,
    ) -> Result<WithdrawalTiming, LedgerError> {
        if self.store.account(account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id.clone()));
        }
        let latest = self.store.latest_withdrawal(account_id).await?;
        Ok(WithdrawalTiming::evaluate(
            latest.map(|w| w.created_at),
            self.window,
            self.time_source.now(),
        ))
    }
}

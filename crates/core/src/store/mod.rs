//! Storage abstraction for accounts, withdrawals, and earning lines.
//!
//! Every balance mutation is a single conditional operation executed by the
//! store itself: the precondition (cooldown elapsed, balance sufficient,
//! status still pending) is evaluated and the write applied as one unit.
//! Callers never read a balance, decide, and write it back.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::amount::Amount;
use crate::error::StoreError;
use crate::model::{
    Account, AccountId, EarningRecord, LedgerStats, WithdrawalId, WithdrawalRecord,
    WithdrawalStatus,
};

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Credit one reward if the account's reward cooldown has elapsed.
#[derive(Debug, Clone)]
pub struct RewardAccrual {
    pub account_id: AccountId,
    pub reward: Amount,
    pub cooldown: Duration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AccrualOutcome {
    Credited {
        account: Account,
        earning: EarningRecord,
    },
    RateLimited {
        next_eligible_at: DateTime<Utc>,
    },
    AccountNotFound,
}

/// Debit the record's canonical amount and insert it as pending.
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub record: WithdrawalRecord,
    /// When set, refuse if a non-cancelled withdrawal was created within
    /// this window before `record.created_at`.
    pub cooldown: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Opened {
        record: WithdrawalRecord,
        balance: Amount,
    },
    InsufficientBalance {
        available: Amount,
    },
    CooldownActive {
        next_eligible_at: DateTime<Utc>,
    },
    AccountNotFound,
}

/// Guarded status change: applies only while the record is in `from`.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub id: WithdrawalId,
    pub from: WithdrawalStatus,
    pub to: WithdrawalStatus,
    /// Restrict the change to records owned by this account.
    pub owner: Option<AccountId>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ChangeOutcome {
    /// Status changed; `balance` is the owner's balance afterwards, with
    /// the refund applied when `to` refunds.
    Applied {
        record: WithdrawalRecord,
        balance: Amount,
    },
    NotFound,
    Conflict {
        current: WithdrawalStatus,
    },
}

pub trait LedgerStore: Send + Sync + 'static {
    /// Fetch the account, creating an empty one on first sight.
    fn ensure_account<'a>(
        &'a self,
        id: &'a AccountId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Account>;

    fn account<'a>(&'a self, id: &'a AccountId) -> StoreFuture<'a, Option<Account>>;

    fn accrue_reward(&self, accrual: RewardAccrual) -> StoreFuture<'_, AccrualOutcome>;

    fn open_withdrawal(&self, request: NewWithdrawal) -> StoreFuture<'_, OpenOutcome>;

    fn change_status(&self, change: StatusChange) -> StoreFuture<'_, ChangeOutcome>;

    fn withdrawal(&self, id: WithdrawalId) -> StoreFuture<'_, Option<WithdrawalRecord>>;

    /// Most recent withdrawal that still counts towards the cooldown, i.e.
    /// any status except cancelled.
    fn latest_withdrawal<'a>(
        &'a self,
        account_id: &'a AccountId,
    ) -> StoreFuture<'a, Option<WithdrawalRecord>>;

    /// Withdrawals newest first, optionally restricted to one account.
    fn withdrawals<'a>(
        &'a self,
        account_id: Option<&'a AccountId>,
    ) -> StoreFuture<'a, Vec<WithdrawalRecord>>;

    /// Earning lines newest first.
    fn earnings<'a>(&'a self, account_id: &'a AccountId) -> StoreFuture<'a, Vec<EarningRecord>>;

    /// Accounts by lifetime earnings, highest first.
    fn top_earners(&self, limit: usize) -> StoreFuture<'_, Vec<Account>>;

    /// Counters; `new_accounts_last_24h` counts accounts created at or after `since`.
    fn stats(&self, since: DateTime<Utc>) -> StoreFuture<'_, LedgerStats>;
}

/// End of a cooldown window that started at `start`.
pub fn window_end(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

//! In-process store over a sharded concurrent map.
//!
//! Each account's balance, withdrawals, and earning lines live together in
//! one map entry, so every conditional update holds exactly one entry lock
//! and accounts never lock each other. A secondary index maps withdrawal
//! ids to their owning account; it is only ever read and released before
//! the account entry is locked.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    window_end, AccrualOutcome, ChangeOutcome, LedgerStore, NewWithdrawal, OpenOutcome,
    RewardAccrual, StatusChange, StoreFuture,
};
use crate::error::StoreError;
use crate::model::{
    Account, AccountId, EarningRecord, LedgerStats, WithdrawalId, WithdrawalRecord,
    WithdrawalStatus,
};

#[derive(Debug)]
struct AccountSlot {
    account: Account,
    withdrawals: BTreeMap<WithdrawalId, WithdrawalRecord>,
    earnings: Vec<EarningRecord>,
}

impl AccountSlot {
    fn new(account: Account) -> Self {
        Self {
            account,
            withdrawals: BTreeMap::new(),
            earnings: Vec::new(),
        }
    }

    fn latest_counted(&self) -> Option<&WithdrawalRecord> {
        self.withdrawals
            .values()
            .filter(|w| w.status != WithdrawalStatus::Cancelled)
            .max_by_key(|w| (w.created_at, w.id))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, AccountSlot>,
    owners: DashMap<WithdrawalId, AccountId>,
    unavailable: AtomicBool,
}

fn ready<T: Send + 'static>(result: Result<T, StoreError>) -> StoreFuture<'static, T> {
    Box::pin(async move { result })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn accrue(&self, accrual: RewardAccrual) -> Result<AccrualOutcome, StoreError> {
        let Some(mut slot) = self.accounts.get_mut(&accrual.account_id) else {
            return Ok(AccrualOutcome::AccountNotFound);
        };

        if let Some(last) = slot.account.last_reward_at {
            let next_eligible_at = window_end(last, accrual.cooldown);
            if accrual.now < next_eligible_at {
                return Ok(AccrualOutcome::RateLimited { next_eligible_at });
            }
        }

        let account = &slot.account;
        let balance = account
            .balance
            .checked_add(accrual.reward)
            .ok_or(StoreError::Overflow("balance"))?;
        let total_earnings = account
            .total_earnings
            .checked_add(accrual.reward)
            .ok_or(StoreError::Overflow("total earnings"))?;
        let ads_watched = account
            .ads_watched
            .checked_add(1)
            .ok_or(StoreError::Overflow("ads watched"))?;

        let earning = EarningRecord::completed(accrual.account_id, accrual.reward, accrual.now);
        let slot = &mut *slot;
        slot.account.balance = balance;
        slot.account.total_earnings = total_earnings;
        slot.account.ads_watched = ads_watched;
        slot.account.last_reward_at = Some(accrual.now);
        slot.earnings.push(earning.clone());

        Ok(AccrualOutcome::Credited {
            account: slot.account.clone(),
            earning,
        })
    }

    fn open(&self, request: NewWithdrawal) -> Result<OpenOutcome, StoreError> {
        let record = request.record;
        let Some(mut slot) = self.accounts.get_mut(&record.account_id) else {
            return Ok(OpenOutcome::AccountNotFound);
        };

        if let Some(window) = request.cooldown {
            if let Some(last) = slot.latest_counted() {
                let next_eligible_at = window_end(last.created_at, window);
                if record.created_at < next_eligible_at {
                    return Ok(OpenOutcome::CooldownActive { next_eligible_at });
                }
            }
        }

        let Some(balance) = slot.account.balance.checked_sub(record.amount) else {
            return Ok(OpenOutcome::InsufficientBalance {
                available: slot.account.balance,
            });
        };

        slot.account.balance = balance;
        slot.withdrawals.insert(record.id, record.clone());
        self.owners.insert(record.id, record.account_id.clone());

        Ok(OpenOutcome::Opened { record, balance })
    }

    fn change(&self, change: StatusChange) -> Result<ChangeOutcome, StoreError> {
        let Some(owner) = self.owners.get(&change.id).map(|o| o.value().clone()) else {
            return Ok(ChangeOutcome::NotFound);
        };
        if change.owner.as_ref().is_some_and(|required| *required != owner) {
            return Ok(ChangeOutcome::NotFound);
        }

        let Some(mut slot) = self.accounts.get_mut(&owner) else {
            return Err(StoreError::Corrupt(format!(
                "withdrawal {} indexed under missing account {owner}",
                change.id
            )));
        };
        let slot = &mut *slot;
        let Some(record) = slot.withdrawals.get_mut(&change.id) else {
            return Err(StoreError::Corrupt(format!(
                "withdrawal {} missing from account {owner}",
                change.id
            )));
        };

        if record.status != change.from || !change.from.can_transition_to(change.to) {
            return Ok(ChangeOutcome::Conflict {
                current: record.status,
            });
        }

        let balance = if change.to.refunds() {
            slot.account
                .balance
                .checked_add(record.amount)
                .ok_or(StoreError::Overflow("balance"))?
        } else {
            slot.account.balance
        };

        record.status = change.to;
        record.updated_at = change.now;
        slot.account.balance = balance;

        Ok(ChangeOutcome::Applied {
            record: record.clone(),
            balance,
        })
    }
}

impl LedgerStore for MemoryStore {
    fn ensure_account<'a>(
        &'a self,
        id: &'a AccountId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Account> {
        let result = self.check_available().map(|()| {
            self.accounts
                .entry(id.clone())
                .or_insert_with(|| AccountSlot::new(Account::new(id.clone(), now)))
                .account
                .clone()
        });
        ready(result)
    }

    fn account<'a>(&'a self, id: &'a AccountId) -> StoreFuture<'a, Option<Account>> {
        let result = self
            .check_available()
            .map(|()| self.accounts.get(id).map(|slot| slot.account.clone()));
        ready(result)
    }

    fn accrue_reward(&self, accrual: RewardAccrual) -> StoreFuture<'_, AccrualOutcome> {
        ready(self.check_available().and_then(|()| self.accrue(accrual)))
    }

    fn open_withdrawal(&self, request: NewWithdrawal) -> StoreFuture<'_, OpenOutcome> {
        ready(self.check_available().and_then(|()| self.open(request)))
    }

    fn change_status(&self, change: StatusChange) -> StoreFuture<'_, ChangeOutcome> {
        ready(self.check_available().and_then(|()| self.change(change)))
    }

    fn withdrawal(&self, id: WithdrawalId) -> StoreFuture<'_, Option<WithdrawalRecord>> {
        let result = self.check_available().map(|()| {
            let owner = self.owners.get(&id).map(|o| o.value().clone())?;
            let slot = self.accounts.get(&owner)?;
            slot.withdrawals.get(&id).cloned()
        });
        ready(result)
    }

    fn latest_withdrawal<'a>(
        &'a self,
        account_id: &'a AccountId,
    ) -> StoreFuture<'a, Option<WithdrawalRecord>> {
        let result = self.check_available().map(|()| {
            self.accounts
                .get(account_id)
                .and_then(|slot| slot.latest_counted().cloned())
        });
        ready(result)
    }

    fn withdrawals<'a>(
        &'a self,
        account_id: Option<&'a AccountId>,
    ) -> StoreFuture<'a, Vec<WithdrawalRecord>> {
        let result = self.check_available().map(|()| {
            let mut records: Vec<WithdrawalRecord> = match account_id {
                Some(id) => self
                    .accounts
                    .get(id)
                    .map(|slot| slot.withdrawals.values().cloned().collect())
                    .unwrap_or_default(),
                None => self
                    .accounts
                    .iter()
                    .flat_map(|slot| slot.withdrawals.values().cloned().collect::<Vec<_>>())
                    .collect(),
            };
            records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            records
        });
        ready(result)
    }

    fn earnings<'a>(&'a self, account_id: &'a AccountId) -> StoreFuture<'a, Vec<EarningRecord>> {
        let result = self.check_available().map(|()| {
            self.accounts
                .get(account_id)
                .map(|slot| slot.earnings.iter().rev().cloned().collect())
                .unwrap_or_default()
        });
        ready(result)
    }

    fn top_earners(&self, limit: usize) -> StoreFuture<'_, Vec<Account>> {
        let result = self.check_available().map(|()| {
            let mut accounts: Vec<Account> =
                self.accounts.iter().map(|slot| slot.account.clone()).collect();
            accounts.sort_by(|a, b| {
                b.total_earnings
                    .cmp(&a.total_earnings)
                    .then_with(|| a.id.cmp(&b.id))
            });
            accounts.truncate(limit);
            accounts
        });
        ready(result)
    }

    fn stats(&self, since: DateTime<Utc>) -> StoreFuture<'_, LedgerStats> {
        let result = self.check_available().map(|()| {
            let mut stats = LedgerStats::default();
            for slot in self.accounts.iter() {
                stats.total_accounts += 1;
                if slot.account.created_at >= since {
                    stats.new_accounts_last_24h += 1;
                }
                for record in slot.withdrawals.values() {
                    stats.total_withdrawals += 1;
                    if record.status == WithdrawalStatus::Pending {
                        stats.pending_withdrawals += 1;
                    }
                }
            }
            stats
        });
        ready(result)
    }
}

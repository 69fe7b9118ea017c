//! SQLite-backed store.
//!
//! Each mutation opens a transaction whose first statement is a guarded
//! `UPDATE` carrying the precondition in its `WHERE` clause. When no row
//! matches, the transaction is read back to classify the refusal and then
//! dropped, which rolls it back. Amounts are stored as integer micro-units
//! and timestamps as Unix milliseconds.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use ulid::Ulid;

use super::{
    window_end, AccrualOutcome, ChangeOutcome, LedgerStore, NewWithdrawal, OpenOutcome,
    RewardAccrual, StatusChange, StoreFuture,
};
use crate::amount::Amount;
use crate::error::StoreError;
use crate::model::{
    Account, AccountId, EarningKind, EarningRecord, EarningStatus, LedgerStats, WithdrawalId,
    WithdrawalRecord, WithdrawalStatus,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY NOT NULL,
        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        total_earnings INTEGER NOT NULL DEFAULT 0,
        ads_watched INTEGER NOT NULL DEFAULT 0,
        last_reward_at INTEGER,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS withdrawals (
        id TEXT PRIMARY KEY NOT NULL,
        account_id TEXT NOT NULL REFERENCES accounts(id),
        method_id TEXT NOT NULL,
        network_id TEXT NOT NULL,
        amount INTEGER NOT NULL CHECK (amount > 0),
        original_amount INTEGER NOT NULL,
        currency TEXT NOT NULL,
        fee INTEGER NOT NULL,
        recipient TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS withdrawals_by_account ON withdrawals (account_id, created_at)",
    "CREATE TABLE IF NOT EXISTS earnings (
        id TEXT PRIMARY KEY NOT NULL,
        account_id TEXT NOT NULL REFERENCES accounts(id),
        kind TEXT NOT NULL,
        amount INTEGER NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS earnings_by_account ON earnings (account_id, created_at)",
];

const ACCOUNT_COLUMNS: &str =
    "id, balance, total_earnings, ads_watched, last_reward_at, created_at";
const WITHDRAWAL_COLUMNS: &str = "id, account_id, method_id, network_id, amount, original_amount, \
     currency, fee, recipient, status, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            // Every connection to `:memory:` is a separate database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        tracing::debug!("SQLite schema ready");
        Ok(Self { pool })
    }

    async fn ensure(&self, id: &AccountId, now: DateTime<Utc>) -> Result<Account, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("INSERT OR IGNORE INTO accounts (id, created_at) VALUES (?1, ?2)")
            .bind(id.as_str())
            .bind(now.timestamp_millis())
            .execute(&mut *conn)
            .await?;
        fetch_account(&mut conn, id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("account {id} vanished after insert")))
    }

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_account(&mut conn, id).await
    }

    async fn accrue(&self, accrual: RewardAccrual) -> Result<AccrualOutcome, StoreError> {
        let reward = to_units(accrual.reward, "reward")?;
        let now = accrual.now.timestamp_millis();
        let cutoff = now.saturating_sub(duration_ms(accrual.cooldown));

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE accounts
             SET balance = balance + ?1,
                 total_earnings = total_earnings + ?1,
                 ads_watched = ads_watched + 1,
                 last_reward_at = ?2
             WHERE id = ?3
               AND (last_reward_at IS NULL OR last_reward_at <= ?4)
               AND balance <= ?5 AND total_earnings <= ?5",
        )
        .bind(reward)
        .bind(now)
        .bind(accrual.account_id.as_str())
        .bind(cutoff)
        .bind(i64::MAX - reward)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let Some(account) = fetch_account(&mut tx, &accrual.account_id).await? else {
                return Ok(AccrualOutcome::AccountNotFound);
            };
            if let Some(last) = account.last_reward_at {
                let next_eligible_at = window_end(last, accrual.cooldown);
                if now < next_eligible_at.timestamp_millis() {
                    return Ok(AccrualOutcome::RateLimited { next_eligible_at });
                }
            }
            return Err(StoreError::Overflow("balance"));
        }

        let earning =
            EarningRecord::completed(accrual.account_id.clone(), accrual.reward, accrual.now);
        sqlx::query(
            "INSERT INTO earnings (id, account_id, kind, amount, status, created_at)
             VALUES (?1, ?2, 'earning', ?3, 'completed', ?4)",
        )
        .bind(earning.id.to_string())
        .bind(earning.account_id.as_str())
        .bind(reward)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let account = fetch_account(&mut tx, &accrual.account_id)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupt(format!("account {} vanished", accrual.account_id))
            })?;
        tx.commit().await?;

        Ok(AccrualOutcome::Credited { account, earning })
    }

    async fn open(&self, request: NewWithdrawal) -> Result<OpenOutcome, StoreError> {
        let record = request.record;
        let amount = to_units(record.amount, "amount")?;
        let created = record.created_at.timestamp_millis();
        let cutoff = request
            .cooldown
            .map(|window| created.saturating_sub(duration_ms(window)));

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE accounts
             SET balance = balance - ?1
             WHERE id = ?2
               AND balance >= ?1
               AND (?3 IS NULL OR NOT EXISTS (
                   SELECT 1 FROM withdrawals w
                   WHERE w.account_id = ?2
                     AND w.status != 'cancelled'
                     AND w.created_at > ?3
               ))",
        )
        .bind(amount)
        .bind(record.account_id.as_str())
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let Some(account) = fetch_account(&mut tx, &record.account_id).await? else {
                return Ok(OpenOutcome::AccountNotFound);
            };
            if let Some(window) = request.cooldown {
                if let Some(last) = fetch_latest(&mut tx, &record.account_id).await? {
                    let next_eligible_at = window_end(last.created_at, window);
                    if created < next_eligible_at.timestamp_millis() {
                        return Ok(OpenOutcome::CooldownActive { next_eligible_at });
                    }
                }
            }
            return Ok(OpenOutcome::InsufficientBalance {
                available: account.balance,
            });
        }

        sqlx::query(
            "INSERT INTO withdrawals (id, account_id, method_id, network_id, amount,
                                      original_amount, currency, fee, recipient, status,
                                      created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(record.id.to_string())
        .bind(record.account_id.as_str())
        .bind(&record.method_id)
        .bind(&record.network_id)
        .bind(amount)
        .bind(to_units(record.original_amount, "original amount")?)
        .bind(&record.currency)
        .bind(to_units(record.fee, "fee")?)
        .bind(&record.recipient)
        .bind(record.status.as_str())
        .bind(created)
        .bind(record.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let balance = fetch_balance(&mut tx, &record.account_id).await?;
        tx.commit().await?;

        Ok(OpenOutcome::Opened { record, balance })
    }

    async fn change(&self, change: StatusChange) -> Result<ChangeOutcome, StoreError> {
        let id = change.id.to_string();
        let owner = change.owner.as_ref().map(AccountId::as_str);

        let mut tx = self.pool.begin().await?;
        let updated = if change.from.can_transition_to(change.to) {
            sqlx::query(
                "UPDATE withdrawals
                 SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4 AND (?5 IS NULL OR account_id = ?5)",
            )
            .bind(change.to.as_str())
            .bind(change.now.timestamp_millis())
            .bind(&id)
            .bind(change.from.as_str())
            .bind(owner)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            0
        };

        if updated == 0 {
            return Ok(match fetch_withdrawal(&mut tx, change.id).await? {
                None => ChangeOutcome::NotFound,
                Some(record) if owner.is_some_and(|o| o != record.account_id.as_str()) => {
                    ChangeOutcome::NotFound
                }
                Some(record) => ChangeOutcome::Conflict {
                    current: record.status,
                },
            });
        }

        let record = fetch_withdrawal(&mut tx, change.id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("withdrawal {id} vanished")))?;

        if change.to.refunds() {
            let amount = to_units(record.amount, "amount")?;
            let refunded = sqlx::query(
                "UPDATE accounts SET balance = balance + ?1 WHERE id = ?2 AND balance <= ?3",
            )
            .bind(amount)
            .bind(record.account_id.as_str())
            .bind(i64::MAX - amount)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if refunded == 0 {
                return Err(StoreError::Overflow("balance"));
            }
        }

        let balance = fetch_balance(&mut tx, &record.account_id).await?;
        tx.commit().await?;

        Ok(ChangeOutcome::Applied { record, balance })
    }

    async fn get_withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_withdrawal(&mut conn, id).await
    }

    async fn latest(&self, account_id: &AccountId) -> Result<Option<WithdrawalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_latest(&mut conn, account_id).await
    }

    async fn list(
        &self,
        account_id: Option<&AccountId>,
    ) -> Result<Vec<WithdrawalRecord>, StoreError> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals
             WHERE ?1 IS NULL OR account_id = ?1
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.map(AccountId::as_str))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    async fn list_earnings(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<EarningRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, account_id, amount, created_at FROM earnings
             WHERE account_id = ?1
             ORDER BY created_at DESC, id DESC",
        )
        .bind(account_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(earning_from_row).collect()
    }

    async fn leaders(&self, limit: usize) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY total_earnings DESC, id ASC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn counters(&self, since: DateTime<Utc>) -> Result<LedgerStats, StoreError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM accounts) AS total_accounts,
                (SELECT COUNT(*) FROM accounts WHERE created_at >= ?1) AS new_accounts,
                (SELECT COUNT(*) FROM withdrawals) AS total_withdrawals,
                (SELECT COUNT(*) FROM withdrawals WHERE status = 'pending') AS pending_withdrawals",
        )
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(LedgerStats {
            total_accounts: count(&row, "total_accounts")?,
            total_withdrawals: count(&row, "total_withdrawals")?,
            pending_withdrawals: count(&row, "pending_withdrawals")?,
            new_accounts_last_24h: count(&row, "new_accounts")?,
        })
    }
}

impl LedgerStore for SqliteStore {
    fn ensure_account<'a>(
        &'a self,
        id: &'a AccountId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Account> {
        Box::pin(self.ensure(id, now))
    }

    fn account<'a>(&'a self, id: &'a AccountId) -> StoreFuture<'a, Option<Account>> {
        Box::pin(self.load_account(id))
    }

    fn accrue_reward(&self, accrual: RewardAccrual) -> StoreFuture<'_, AccrualOutcome> {
        Box::pin(self.accrue(accrual))
    }

    fn open_withdrawal(&self, request: NewWithdrawal) -> StoreFuture<'_, OpenOutcome> {
        Box::pin(self.open(request))
    }

    fn change_status(&self, change: StatusChange) -> StoreFuture<'_, ChangeOutcome> {
        Box::pin(self.change(change))
    }

    fn withdrawal(&self, id: WithdrawalId) -> StoreFuture<'_, Option<WithdrawalRecord>> {
        Box::pin(self.get_withdrawal(id))
    }

    fn latest_withdrawal<'a>(
        &'a self,
        account_id: &'a AccountId,
    ) -> StoreFuture<'a, Option<WithdrawalRecord>> {
        Box::pin(self.latest(account_id))
    }

    fn withdrawals<'a>(
        &'a self,
        account_id: Option<&'a AccountId>,
    ) -> StoreFuture<'a, Vec<WithdrawalRecord>> {
        Box::pin(self.list(account_id))
    }

    fn earnings<'a>(&'a self, account_id: &'a AccountId) -> StoreFuture<'a, Vec<EarningRecord>> {
        Box::pin(self.list_earnings(account_id))
    }

    fn top_earners(&self, limit: usize) -> StoreFuture<'_, Vec<Account>> {
        Box::pin(self.leaders(limit))
    }

    fn stats(&self, since: DateTime<Utc>) -> StoreFuture<'_, LedgerStats> {
        Box::pin(self.counters(since))
    }
}

// =============================================================================
// Row helpers
// =============================================================================

async fn fetch_account(
    conn: &mut SqliteConnection,
    id: &AccountId,
) -> Result<Option<Account>, StoreError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
    let row = sqlx::query(&sql)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(account_from_row).transpose()
}

async fn fetch_balance(conn: &mut SqliteConnection, id: &AccountId) -> Result<Amount, StoreError> {
    fetch_account(conn, id)
        .await?
        .map(|account| account.balance)
        .ok_or_else(|| StoreError::Corrupt(format!("account {id} missing")))
}

async fn fetch_withdrawal(
    conn: &mut SqliteConnection,
    id: WithdrawalId,
) -> Result<Option<WithdrawalRecord>, StoreError> {
    let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?1");
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(withdrawal_from_row).transpose()
}

async fn fetch_latest(
    conn: &mut SqliteConnection,
    account_id: &AccountId,
) -> Result<Option<WithdrawalRecord>, StoreError> {
    let sql = format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals
         WHERE account_id = ?1 AND status != 'cancelled'
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    );
    let row = sqlx::query(&sql)
        .bind(account_id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(withdrawal_from_row).transpose()
}

fn account_from_row(row: &SqliteRow) -> Result<Account, StoreError> {
    let id: String = row.try_get("id")?;
    let ads_watched: i64 = row.try_get("ads_watched")?;
    Ok(Account {
        id: AccountId::new(id),
        balance: amount(row, "balance")?,
        total_earnings: amount(row, "total_earnings")?,
        ads_watched: u64::try_from(ads_watched)
            .map_err(|_| StoreError::Corrupt("negative ads_watched".to_string()))?,
        last_reward_at: optional_time(row, "last_reward_at")?,
        created_at: time(row, "created_at")?,
    })
}

fn withdrawal_from_row(row: &SqliteRow) -> Result<WithdrawalRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let account_id: String = row.try_get("account_id")?;
    let status: String = row.try_get("status")?;
    Ok(WithdrawalRecord {
        id: WithdrawalId::from_str(&id)
            .map_err(|e| StoreError::Corrupt(format!("withdrawal id {id}: {e}")))?,
        account_id: AccountId::new(account_id),
        method_id: row.try_get("method_id")?,
        network_id: row.try_get("network_id")?,
        amount: amount(row, "amount")?,
        original_amount: amount(row, "original_amount")?,
        currency: row.try_get("currency")?,
        fee: amount(row, "fee")?,
        recipient: row.try_get("recipient")?,
        status: status
            .parse()
            .map_err(|s| StoreError::Corrupt(format!("withdrawal status `{s}`")))?,
        created_at: time(row, "created_at")?,
        updated_at: time(row, "updated_at")?,
    })
}

fn earning_from_row(row: &SqliteRow) -> Result<EarningRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let account_id: String = row.try_get("account_id")?;
    Ok(EarningRecord {
        id: Ulid::from_string(&id)
            .map_err(|e| StoreError::Corrupt(format!("earning id {id}: {e}")))?,
        account_id: AccountId::new(account_id),
        kind: EarningKind::Earning,
        amount: amount(row, "amount")?,
        status: EarningStatus::Completed,
        created_at: time(row, "created_at")?,
    })
}

fn amount(row: &SqliteRow, column: &str) -> Result<Amount, StoreError> {
    let units: i64 = row.try_get(column)?;
    u64::try_from(units)
        .map(Amount::from_units)
        .map_err(|_| StoreError::Corrupt(format!("negative {column}")))
}

fn time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    let ms: i64 = row.try_get(column)?;
    from_millis(ms, column)
}

fn optional_time(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let ms: Option<i64> = row.try_get(column)?;
    ms.map(|ms| from_millis(ms, column)).transpose()
}

fn from_millis(ms: i64, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("{column} out of range")))
}

fn count(row: &SqliteRow, column: &str) -> Result<u64, StoreError> {
    let n: i64 = row.try_get(column)?;
    u64::try_from(n).map_err(|_| StoreError::Corrupt(format!("negative {column}")))
}

fn to_units(amount: Amount, what: &'static str) -> Result<i64, StoreError> {
    i64::try_from(amount.units()).map_err(|_| StoreError::Overflow(what))
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

//! Ledger records: accounts, withdrawals, and earning lines.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::amount::Amount;

/// Opaque account identity as yielded by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalId(Ulid);

impl WithdrawalId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Id whose embedded timestamp matches the record's creation time, so
    /// ordering by id is ordering by creation.
    pub fn at(created_at: DateTime<Utc>) -> Self {
        let ms = u64::try_from(created_at.timestamp_millis()).unwrap_or(0);
        Self(Ulid::from_parts(ms, rand_bits()))
    }
}

impl Default for WithdrawalId {
    fn default() -> Self {
        Self::new()
    }
}

fn rand_bits() -> u128 {
    // The random component of a fresh ULID.
    Ulid::new().random()
}

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for WithdrawalId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub balance: Amount,
    pub total_earnings: Amount,
    pub ads_watched: u64,
    pub last_reward_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            balance: Amount::ZERO,
            total_earnings: Amount::ZERO,
            ads_watched: 0,
            last_reward_at: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

/// Every permitted status change and whether it returns the funds.
///
/// Anything not listed is an invalid transition.
pub const TRANSITIONS: &[(WithdrawalStatus, WithdrawalStatus, bool)] = &[
    (WithdrawalStatus::Pending, WithdrawalStatus::Approved, false),
    (WithdrawalStatus::Pending, WithdrawalStatus::Rejected, true),
    (WithdrawalStatus::Pending, WithdrawalStatus::Cancelled, true),
];

impl WithdrawalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        TRANSITIONS
            .iter()
            .any(|&(from, to, _)| from == self && to == next)
    }

    /// Whether entering this status credits the withdrawn amount back.
    pub fn refunds(self) -> bool {
        TRANSITIONS
            .iter()
            .any(|&(_, to, refund)| to == self && refund)
    }

    pub fn is_terminal(self) -> bool {
        !TRANSITIONS.iter().any(|&(from, _, _)| from == self)
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(other.to_string()),
        }
    }
}

/// Administrative verdict on a pending withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn status(self) -> WithdrawalStatus {
        match self {
            Self::Approved => WithdrawalStatus::Approved,
            Self::Rejected => WithdrawalStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<WithdrawalStatus>() {
            Ok(WithdrawalStatus::Approved) => Ok(Self::Approved),
            Ok(WithdrawalStatus::Rejected) => Ok(Self::Rejected),
            _ => Err(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub id: WithdrawalId,
    pub account_id: AccountId,
    pub method_id: String,
    pub network_id: String,
    /// Canonical amount actually debited.
    pub amount: Amount,
    /// Amount as entered, in `currency`.
    pub original_amount: Amount,
    pub currency: String,
    /// Network fee in `currency`; informational.
    pub fee: Amount,
    pub recipient: String,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarningKind {
    Earning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarningStatus {
    Completed,
}

/// Append-only ledger line written for every credited reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningRecord {
    pub id: Ulid,
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub kind: EarningKind,
    pub amount: Amount,
    pub status: EarningStatus,
    pub created_at: DateTime<Utc>,
}

impl EarningRecord {
    pub fn completed(account_id: AccountId, amount: Amount, created_at: DateTime<Utc>) -> Self {
        let ms = u64::try_from(created_at.timestamp_millis()).unwrap_or(0);
        Self {
            id: Ulid::from_parts(ms, rand_bits()),
            account_id,
            kind: EarningKind::Earning,
            amount,
            status: EarningStatus::Completed,
            created_at,
        }
    }
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_accounts: u64,
    pub total_withdrawals: u64,
    pub pending_withdrawals: u64,
    pub new_accounts_last_24h: u64,
}

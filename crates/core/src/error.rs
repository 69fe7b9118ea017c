use chrono::{DateTime, Utc};

use crate::amount::Amount;
use crate::currency::ConversionError;
use crate::model::{AccountId, WithdrawalId, WithdrawalStatus};

/// Failures of the backing store.
///
/// None of these imply that a mutation took effect: every store operation
/// either applies completely or not at all.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored value overflows: {0}")]
    Overflow(&'static str),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Every way a ledger operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("please wait before watching another ad")]
    RateLimited { next_eligible_at: DateTime<Utc> },
    #[error("unknown withdrawal method `{0}`")]
    UnknownMethod(String),
    #[error("unknown network `{network}` for method `{method}`")]
    UnknownNetwork { method: String, network: String },
    #[error("invalid recipient for {method}: {reason}")]
    InvalidRecipient { method: String, reason: &'static str },
    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),
    #[error("minimum withdrawal amount is {min} {currency}")]
    BelowMinimum { min: Amount, currency: String },
    #[error("maximum withdrawal amount is {max} {currency}")]
    AboveMaximum { max: Amount, currency: String },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: Amount, requested: Amount },
    #[error("next withdrawal allowed at {next_eligible_at}")]
    CooldownActive { next_eligible_at: DateTime<Utc> },
    #[error("withdrawal {0} not found")]
    NotFound(WithdrawalId),
    #[error("withdrawal {id} is {current} and cannot become {requested}")]
    InvalidTransition {
        id: WithdrawalId,
        current: WithdrawalStatus,
        requested: WithdrawalStatus,
    },
    #[error("invalid decision `{0}`, expected `approved` or `rejected`")]
    InvalidDecision(String),
    #[error("caller lacks the administrative capability")]
    Unauthorized,
    #[error("transient store failure: {0}")]
    TransientStore(#[from] StoreError),
}

impl LedgerError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "account_not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::UnknownMethod(_) => "unknown_method",
            Self::UnknownNetwork { .. } => "unknown_network",
            Self::InvalidRecipient { .. } => "invalid_recipient",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::BelowMinimum { .. } => "below_minimum",
            Self::AboveMaximum { .. } => "above_maximum",
            Self::Conversion(ConversionError::Unsupported(_)) => "unsupported_currency",
            Self::Conversion(_) => "conversion_failed",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidDecision(_) => "invalid_decision",
            Self::Unauthorized => "unauthorized",
            Self::TransientStore(_) => "transient_store_error",
        }
    }

    /// Only store failures may be retried by infrastructure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

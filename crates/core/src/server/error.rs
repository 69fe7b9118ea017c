use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use crate::error::LedgerError;

/// Error returned by every handler, rendered as
/// `{ "error": <code>, "message": <text>, ...details }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(&'static str),
    /// Malformed request body or query.
    BadRequest(String),
    /// Path id that cannot name any withdrawal.
    InvalidId(String),
    Ledger(LedgerError),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::AccountNotFound(_) | LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::RateLimited { .. } | LedgerError::CooldownActive { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        }
        LedgerError::UnknownMethod(_)
        | LedgerError::UnknownNetwork { .. }
        | LedgerError::InvalidRecipient { .. }
        | LedgerError::InvalidAmount(_)
        | LedgerError::BelowMinimum { .. }
        | LedgerError::AboveMaximum { .. }
        | LedgerError::Conversion(_)
        | LedgerError::InsufficientBalance { .. }
        | LedgerError::InvalidDecision(_) => StatusCode::BAD_REQUEST,
        LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LedgerError::Unauthorized => StatusCode::FORBIDDEN,
        LedgerError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn details(err: &LedgerError) -> Map<String, Value> {
    let value = match err {
        LedgerError::RateLimited { next_eligible_at }
        | LedgerError::CooldownActive { next_eligible_at } => {
            json!({ "nextEligibleAt": next_eligible_at })
        }
        LedgerError::BelowMinimum { min, currency } => json!({ "min": min, "currency": currency }),
        LedgerError::AboveMaximum { max, currency } => json!({ "max": max, "currency": currency }),
        LedgerError::InsufficientBalance {
            available,
            requested,
        } => json!({ "available": available, "requested": requested }),
        LedgerError::InvalidTransition {
            current, requested, ..
        } => json!({ "current": current, "requested": requested }),
        _ => return Map::new(),
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, extra) = match self {
            Self::Unauthenticated(reason) => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                reason.to_string(),
                Map::new(),
            ),
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "bad_request", message, Map::new())
            }
            Self::InvalidId(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("withdrawal {id} not found"),
                Map::new(),
            ),
            Self::Ledger(err) => {
                if err.is_retryable() {
                    tracing::error!(error = %err, "Store failure");
                } else {
                    tracing::debug!(code = err.code(), error = %err, "Request rejected");
                }
                (status_for(&err), err.code(), err.to_string(), details(&err))
            }
        };

        let mut body = Map::new();
        body.insert("error".to_string(), Value::from(code));
        body.insert("message".to_string(), Value::from(message));
        body.extend(extra);
        (status, Json(Value::Object(body))).into_response()
    }
}

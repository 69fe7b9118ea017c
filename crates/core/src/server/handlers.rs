use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::error::ApiError;
use super::AppState;
use crate::auth::Caller;
use crate::catalog::MethodEntry;
use crate::cooldown::WithdrawalTiming;
use crate::error::LedgerError;
use crate::model::{Account, Decision, EarningRecord, LedgerStats, WithdrawalId};
use crate::rewards::RewardReceipt;
use crate::withdrawal::{Cancellation, WithdrawalRequest, WithdrawalView};

type ApiResult<T> = Result<Json<T>, ApiError>;

const DEFAULT_TOP_EARNERS: usize = 10;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn withdrawal_id(raw: &str) -> Result<WithdrawalId, ApiError> {
    raw.parse().map_err(|_| ApiError::InvalidId(raw.to_string()))
}

pub(super) async fn health() -> &'static str {
    "ok"
}

pub(super) async fn reward(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<RewardReceipt> {
    Ok(Json(state.ledger.rewards().credit_reward(&caller.account_id).await?))
}

pub(super) async fn request_withdrawal(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<WithdrawalRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WithdrawalView>), ApiError> {
    let request = body(payload)?;
    let view = state
        .ledger
        .withdrawals()
        .request_withdrawal(&caller.account_id, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub(super) async fn withdrawal_timing(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<WithdrawalTiming> {
    Ok(Json(state.ledger.cooldown().can_withdraw(&caller.account_id).await?))
}

#[derive(Debug, Deserialize)]
pub(super) struct DecisionBody {
    status: String,
}

pub(super) async fn decide(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<DecisionBody>, JsonRejection>,
) -> ApiResult<WithdrawalView> {
    // Capability first, so non-admins learn nothing about ids or bodies.
    if !caller.is_admin {
        return Err(LedgerError::Unauthorized.into());
    }
    let id = withdrawal_id(&id)?;
    let status = body(payload)?.status;
    let decision: Decision = status.parse().map_err(LedgerError::InvalidDecision)?;
    Ok(Json(state.ledger.withdrawals().decide(&caller, id, decision).await?))
}

pub(super) async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Cancellation> {
    let id = withdrawal_id(&id)?;
    Ok(Json(state.ledger.withdrawals().cancel(&caller, id).await?))
}

pub(super) async fn get_withdrawal(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<WithdrawalView> {
    let id = withdrawal_id(&id)?;
    Ok(Json(state.ledger.withdrawals().withdrawal(&caller, id).await?))
}

pub(super) async fn list_withdrawals(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Vec<WithdrawalView>> {
    Ok(Json(state.ledger.withdrawals().list(&caller).await?))
}

pub(super) async fn withdrawal_methods(
    State(state): State<AppState>,
    _caller: Caller,
) -> Json<Vec<MethodEntry>> {
    Json(state.ledger.catalog().active_methods())
}

pub(super) async fn me(State(state): State<AppState>, caller: Caller) -> ApiResult<Account> {
    Ok(Json(state.ledger.account(&caller.account_id).await?))
}

pub(super) async fn earnings(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Vec<EarningRecord>> {
    Ok(Json(state.ledger.earnings(&caller.account_id).await?))
}

#[derive(Debug, Deserialize)]
pub(super) struct TopEarnersQuery {
    limit: Option<usize>,
}

pub(super) async fn top_earners(
    State(state): State<AppState>,
    _caller: Caller,
    query: Result<Query<TopEarnersQuery>, QueryRejection>,
) -> ApiResult<Vec<Account>> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_TOP_EARNERS);
    Ok(Json(state.ledger.top_earners(limit).await?))
}

pub(super) async fn admin_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<LedgerStats> {
    Ok(Json(state.ledger.stats(&caller).await?))
}

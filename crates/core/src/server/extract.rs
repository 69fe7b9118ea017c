use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::error::ApiError;
use super::AppState;
use crate::auth::Caller;

/// Authenticates the request and makes sure the caller's account exists.
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .map(str::to_owned)
            .ok_or(ApiError::Unauthenticated("missing bearer token"))?;
        let caller = state
            .resolver
            .resolve(&token)
            .await
            .ok_or(ApiError::Unauthenticated("invalid bearer token"))?;
        state.ledger.ensure_account(&caller.account_id).await?;
        Ok(caller)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

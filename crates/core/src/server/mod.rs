//! HTTP surface of the ledger.
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`;
//! the token is resolved by the configured [`IdentityResolver`] and the
//! caller's account is created on first sight.

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::auth::IdentityResolver;
use crate::ledger::Ledger;

mod error;
mod extract;
mod handlers;

pub use error::{status_for, ApiError};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { ledger, resolver }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/reward", post(handlers::reward))
        .route("/withdrawal", post(handlers::request_withdrawal))
        .route("/withdrawal-timing", get(handlers::withdrawal_timing))
        .route(
            "/withdrawal/{id}",
            get(handlers::get_withdrawal)
                .put(handlers::decide)
                .delete(handlers::cancel),
        )
        .route("/withdrawals", get(handlers::list_withdrawals))
        .route("/withdrawal-methods", get(handlers::withdrawal_methods))
        .route("/me", get(handlers::me))
        .route("/earnings", get(handlers::earnings))
        .route("/top-earners", get(handlers::top_earners))
        .route("/admin/stats", get(handlers::admin_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

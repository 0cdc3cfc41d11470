//! Health check and admin operations.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::api::auth::AdminGuard;
use crate::api::error::{ApiError, ApiResultExt, CorrelationId};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/health (public, no auth)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "vault_configured": state.clients.vault().is_configured(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/admin/refresh
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one catalog refresh cycle now. Reports `skipped` when another worker
/// holds the refresh lock.
pub async fn refresh_now(
    _guard: AdminGuard,
    State(state): State<AppState>,
    cid: CorrelationId,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::info!(correlation_id = %cid, "manual catalog refresh requested");
    let report = state.refresher.run_cycle().await.or_api(&cid)?;
    Ok(Json(match report {
        Some(report) => serde_json::json!({ "skipped": false, "report": report }),
        None => serde_json::json!({ "skipped": true }),
    }))
}

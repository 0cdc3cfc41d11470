pub mod auth;
pub mod catalog;
pub mod completions;
pub mod error;
pub mod health;
pub mod models;
pub mod providers;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use uuid::Uuid;

use crate::api::error::{ApiError, CorrelationId};
use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the API bearer-token middleware). Admin-only handlers
/// additionally take an `AdminGuard`. Every response carries an
/// `X-Correlation-Id` header.
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health::health));

    let protected = Router::new()
        // Inference
        .route("/v1/chat/completions", post(completions::chat_completions))
        .route("/v1/models", get(models::list_models))
        // Providers
        .route(
            "/v1/providers",
            get(providers::list_providers).post(providers::create_provider),
        )
        .route("/v1/providers/:id", get(providers::get_provider))
        .route(
            "/v1/providers/:id/models",
            get(providers::list_provider_models),
        )
        .route("/v1/providers/:id/sync", post(providers::sync_provider))
        .route("/v1/providers/:id/active", put(providers::set_active))
        .route(
            "/v1/providers/:id/credential",
            put(providers::rotate_credential),
        )
        // Model catalog
        .route(
            "/v1/catalog",
            get(catalog::list_catalog).post(catalog::create_catalog_entry),
        )
        .route(
            "/v1/catalog/:id",
            get(catalog::get_catalog_entry).put(catalog::update_catalog_entry),
        )
        // Admin
        .route("/v1/admin/refresh", post(health::refresh_now))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(middleware::from_fn(error::assign_correlation_id))
}

/// Unwrap a JSON body, rendering rejections in the standard error shape.
pub(crate) fn json_body<T>(
    payload: Result<Json<T>, JsonRejection>,
    cid: &CorrelationId,
) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
            cid,
        )
    })
}

pub(crate) fn parse_public_id(raw: &str, cid: &CorrelationId) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("'{raw}' is not a valid id"),
            cid,
        )
    })
}

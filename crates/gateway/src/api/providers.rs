//! Provider registration, inspection and lifecycle API.
//!
//! Reads are limited to providers visible to the caller. Writes additionally
//! require the caller to own the provider's scope; global providers can only
//! be written with the admin token.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use mg_domain::error::Error;
use mg_domain::provider::{CallerScope, NewProvider, Provider, ProviderKind, ScopeTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api::auth::is_admin;
use crate::api::error::{ApiError, ApiResultExt, CorrelationId};
use crate::api::{json_body, parse_public_id};
use crate::state::AppState;
use crate::tenancy::Caller;

/// Public view of a provider. The credential ciphertext never leaves the
/// server; only whether one is set and its display hint.
#[derive(Debug, Serialize)]
pub struct ProviderView {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub kind: ProviderKind,
    pub scope: ScopeTier,
    pub organization_id: Option<i64>,
    pub project_id: Option<i64>,
    pub base_url: String,
    pub has_credential: bool,
    pub api_key_hint: Option<String>,
    pub active: bool,
    pub is_moderated: bool,
    pub metadata: BTreeMap<String, String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Provider> for ProviderView {
    fn from(p: Provider) -> Self {
        Self {
            id: p.public_id,
            scope: p.tier(),
            has_credential: !p.encrypted_api_key.is_empty(),
            slug: p.slug,
            name: p.name,
            kind: p.kind,
            organization_id: p.organization_id,
            project_id: p.project_id,
            base_url: p.base_url,
            api_key_hint: p.api_key_hint,
            active: p.active,
            is_moderated: p.is_moderated,
            metadata: p.metadata,
            last_synced_at: p.last_synced_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Whether the caller may create or modify a provider at this scope.
fn authorize_write(
    state: &AppState,
    headers: &HeaderMap,
    scope: &CallerScope,
    organization_id: Option<i64>,
    project_id: Option<i64>,
    cid: &CorrelationId,
) -> Result<(), ApiError> {
    if is_admin(state, headers) {
        return Ok(());
    }
    let owned = match (organization_id, project_id) {
        (None, _) => false,
        (Some(org), None) => org == scope.organization_id,
        (Some(org), Some(project)) => {
            org == scope.organization_id && scope.accessible_project_ids.contains(&project)
        }
    };
    if owned {
        Ok(())
    } else if organization_id.is_none() {
        Err(ApiError::forbidden(
            "global providers require the admin token",
            cid,
        ))
    } else {
        Err(ApiError::forbidden(
            "provider scope is outside the caller's organization or projects",
            cid,
        ))
    }
}

/// Load a provider the caller can see. Invisible providers are reported as
/// missing.
async fn visible_provider(
    state: &AppState,
    scope: &CallerScope,
    id: &str,
    cid: &CorrelationId,
) -> Result<Provider, ApiError> {
    let public_id = parse_public_id(id, cid)?;
    let provider = state.registry.get_provider(public_id).await.or_api(cid)?;
    if provider.visible_to(scope.organization_id, &scope.accessible_project_ids) {
        Ok(provider)
    } else {
        Err(ApiError::from_error(
            Error::NotFound(format!("provider {public_id}")),
            cid,
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_providers(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut providers = state
        .registry
        .list_accessible_providers(scope.organization_id, &scope.accessible_project_ids)
        .await
        .or_api(&cid)?;
    providers.sort_by_key(|p| p.id);
    let views: Vec<ProviderView> = providers.into_iter().map(ProviderView::from).collect();
    let count = views.len();
    Ok(Json(serde_json::json!({
        "providers": views,
        "count": count,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_provider(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
    headers: HeaderMap,
    payload: Result<Json<NewProvider>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = json_body(payload, &cid)?;
    authorize_write(
        &state,
        &headers,
        &scope,
        input.organization_id,
        input.project_id,
        &cid,
    )?;
    let provider = state.registry.register_provider(input).await.or_api(&cid)?;
    Ok((StatusCode::CREATED, Json(ProviderView::from(provider))).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/providers/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_provider(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
    Path(id): Path<String>,
) -> Result<Json<ProviderView>, ApiError> {
    let provider = visible_provider(&state, &scope, &id, &cid).await?;
    Ok(Json(provider.into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/providers/:id/models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_provider_models(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = visible_provider(&state, &scope, &id, &cid).await?;
    let models = state
        .registry
        .list_provider_models(provider.id)
        .await
        .or_api(&cid)?;
    let count = models.len();
    Ok(Json(serde_json::json!({
        "provider_id": provider.public_id,
        "models": models,
        "count": count,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/providers/:id/sync
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn sync_provider(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = visible_provider(&state, &scope, &id, &cid).await?;
    authorize_write(
        &state,
        &headers,
        &scope,
        provider.organization_id,
        provider.project_id,
        &cid,
    )?;
    let result = state
        .registry
        .refresh_provider(&state.clients, &provider)
        .await
        .or_api(&cid)?;
    Ok(Json(serde_json::json!({
        "provider_id": provider.public_id,
        "result": result,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/providers/:id/active
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

pub async fn set_active(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Result<Json<ProviderView>, ApiError> {
    let req = json_body(payload, &cid)?;
    let provider = visible_provider(&state, &scope, &id, &cid).await?;
    authorize_write(
        &state,
        &headers,
        &scope,
        provider.organization_id,
        provider.project_id,
        &cid,
    )?;
    let updated = state
        .registry
        .set_provider_active(provider.public_id, req.active)
        .await
        .or_api(&cid)?;
    Ok(Json(updated.into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/providers/:id/credential
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct RotateCredentialRequest {
    /// New plaintext key. Empty clears the credential.
    #[serde(default)]
    pub api_key: String,
}

pub async fn rotate_credential(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<RotateCredentialRequest>, JsonRejection>,
) -> Result<Json<ProviderView>, ApiError> {
    let req = json_body(payload, &cid)?;
    let provider = visible_provider(&state, &scope, &id, &cid).await?;
    authorize_write(
        &state,
        &headers,
        &scope,
        provider.organization_id,
        provider.project_id,
        &cid,
    )?;
    let updated = state
        .registry
        .rotate_credential(provider.public_id, &req.api_key)
        .await
        .or_api(&cid)?;
    Ok(Json(updated.into()))
}

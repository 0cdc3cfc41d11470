//! Model catalog API. Reads are open to any authenticated caller; writes
//! need the admin token.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use mg_domain::provider::{
    CatalogFilter, CatalogStatus, CatalogUpdate, ModelCatalog, NewCatalogEntry, Page,
};
use mg_providers::CatalogPage;
use serde::Deserialize;

use crate::api::auth::AdminGuard;
use crate::api::error::{ApiError, ApiResultExt, CorrelationId};
use crate::api::{json_body, parse_public_id};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub status: Option<CatalogStatus>,
    pub is_moderated: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl CatalogQuery {
    fn split(self) -> (CatalogFilter, Page) {
        let defaults = Page::default();
        let page = Page {
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
        };
        let filter = CatalogFilter {
            status: self.status,
            is_moderated: self.is_moderated,
            search: self.search.filter(|s| !s.trim().is_empty()),
        };
        (filter, page)
    }
}

pub async fn list_catalog(
    State(state): State<AppState>,
    cid: CorrelationId,
    query: Result<Query<CatalogQuery>, QueryRejection>,
) -> Result<Json<CatalogPage>, ApiError> {
    let Query(query) = query.map_err(|e| {
        ApiError::new(StatusCode::BAD_REQUEST, "validation_error", e.body_text(), &cid)
    })?;
    let (filter, page) = query.split();
    let page = state.catalog.list(&filter, page).await.or_api(&cid)?;
    Ok(Json(page))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/catalog/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_catalog_entry(
    State(state): State<AppState>,
    cid: CorrelationId,
    Path(id): Path<String>,
) -> Result<Json<ModelCatalog>, ApiError> {
    let public_id = parse_public_id(&id, &cid)?;
    let entry = state.catalog.get(public_id).await.or_api(&cid)?;
    Ok(Json(entry))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/catalog (admin)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_catalog_entry(
    _guard: AdminGuard,
    State(state): State<AppState>,
    cid: CorrelationId,
    payload: Result<Json<NewCatalogEntry>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = json_body(payload, &cid)?;
    let entry = state.catalog.create(input).await.or_api(&cid)?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/catalog/:id (admin)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn update_catalog_entry(
    _guard: AdminGuard,
    State(state): State<AppState>,
    cid: CorrelationId,
    Path(id): Path<String>,
    payload: Result<Json<CatalogUpdate>, JsonRejection>,
) -> Result<Json<ModelCatalog>, ApiError> {
    let public_id = parse_public_id(&id, &cid)?;
    let update = json_body(payload, &cid)?;
    let entry = state.catalog.update(public_id, update).await.or_api(&cid)?;
    Ok(Json(entry))
}

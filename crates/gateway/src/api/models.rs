use axum::extract::State;
use axum::response::Json;
use mg_providers::ResolvedModel;
use serde::Serialize;

use crate::api::error::{ApiError, ApiResultExt, CorrelationId};
use crate::state::AppState;
use crate::tenancy::Caller;

/// One routable model in the OpenAI `list` shape, plus which provider
/// would serve it for this caller.
#[derive(Debug, Serialize)]
pub struct ModelView {
    pub id: String,
    pub object: &'static str,
    pub owned_by: String,
    pub provider_id: uuid::Uuid,
    pub scope: mg_domain::provider::ScopeTier,
    pub supports_images: bool,
    pub supports_embeddings: bool,
    pub supports_reasoning: bool,
}

impl From<ResolvedModel> for ModelView {
    fn from(resolved: ResolvedModel) -> Self {
        Self {
            id: resolved.model.model_key,
            object: "model",
            owned_by: resolved.provider.slug,
            provider_id: resolved.provider.public_id,
            scope: resolved.tier,
            supports_images: resolved.model.supports_images,
            supports_embeddings: resolved.model.supports_embeddings,
            supports_reasoning: resolved.model.supports_reasoning,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_models(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    let models: Vec<ModelView> = state
        .registry
        .list_accessible_models(&scope)
        .await
        .or_api(&cid)?
        .into_iter()
        .map(ModelView::from)
        .collect();
    Ok(Json(serde_json::json!({
        "object": "list",
        "data": models,
    })))
}

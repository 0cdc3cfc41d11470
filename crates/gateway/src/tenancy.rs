//! Caller tenancy: who is making this request, on behalf of which project.
//!
//! Authentication proper happens upstream of the gateway; the scope resolver
//! only turns request metadata into a [`CallerScope`].

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use mg_domain::error::{Error, Result};
use mg_domain::provider::CallerScope;

use crate::api::error::{ApiError, CorrelationId};
use crate::state::AppState;

pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const PROJECT_HEADER: &str = "x-project-id";
pub const PROJECT_LIST_HEADER: &str = "x-project-ids";

#[async_trait]
pub trait ScopeResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<CallerScope>;
}

/// Reads the caller's tenancy from request headers, falling back to the
/// configured default organization when `X-Organization-Id` is absent.
#[derive(Debug, Clone)]
pub struct HeaderScopeResolver {
    default_organization_id: Option<i64>,
}

impl HeaderScopeResolver {
    pub fn new(default_organization_id: Option<i64>) -> Self {
        Self {
            default_organization_id,
        }
    }
}

#[async_trait]
impl ScopeResolver for HeaderScopeResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<CallerScope> {
        let organization_id = match header_str(headers, ORGANIZATION_HEADER)? {
            Some(raw) => parse_id(ORGANIZATION_HEADER, raw)?,
            None => self.default_organization_id.ok_or_else(|| {
                Error::Validation("X-Organization-Id header is required".into())
            })?,
        };

        let project_id = header_str(headers, PROJECT_HEADER)?
            .map(|raw| parse_id(PROJECT_HEADER, raw))
            .transpose()?;

        let projects = match header_str(headers, PROJECT_LIST_HEADER)? {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_id(PROJECT_LIST_HEADER, s))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(CallerScope::new(organization_id, project_id, projects))
    }
}

/// Header value as trimmed text. Blank counts as absent.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| Error::Validation(format!("{name} header is not valid text")))?
        .trim();
    Ok((!text.is_empty()).then_some(text))
}

fn parse_id(name: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| Error::Validation(format!("{name} must be an integer, got '{raw}'")))
}

// ── Extractor ─────────────────────────────────────────────────────

/// The resolved scope of the current caller. Handlers opt in by taking a
/// `Caller` parameter; resolution failures are rendered as API errors.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerScope);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let cid = CorrelationId::from_parts(parts);
        state
            .scopes
            .resolve(&parts.headers)
            .await
            .map(Caller)
            .map_err(|e| ApiError::from_error(e, &cid))
    }
}

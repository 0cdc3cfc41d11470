//! OpenAI-compatible `/v1/chat/completions` endpoint.
//!
//! The request body is forwarded to the resolved provider untouched. A
//! non-streaming call returns the upstream JSON document; a streaming call
//! answers with `text/event-stream` and relays the upstream bytes as they
//! arrive.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use mg_domain::config::UpstreamConfig;
use mg_domain::error::{Error, Result};
use mg_providers::{CompletionOutcome, CompletionRequest, RelayStream};
use serde_json::Value;

use crate::api::error::{ApiError, ApiResultExt, CorrelationId};
use crate::state::AppState;
use crate::tenancy::Caller;

pub const TIMEOUT_HEADER: &str = "x-request-timeout-ms";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/completions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_completions(
    State(state): State<AppState>,
    cid: CorrelationId,
    Caller(scope): Caller,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("request body is not valid JSON: {e}")))
        .or_api(&cid)?;
    let request = CompletionRequest::from_body(body).or_api(&cid)?;
    let timeout = request_timeout(&headers, &state.config.upstream).or_api(&cid)?;

    tracing::debug!(
        correlation_id = %cid,
        model = request.model(),
        stream = request.is_stream(),
        organization_id = scope.organization_id,
        project_id = ?scope.project_id,
        timeout_ms = timeout.as_millis() as u64,
        "completion request"
    );

    let outcome = state
        .router
        .complete(request, &scope, timeout, cid.as_str())
        .await
        .or_api(&cid)?;

    Ok(match outcome {
        CompletionOutcome::Json(value) => Json(value).into_response(),
        CompletionOutcome::Stream(stream) => event_stream(stream),
    })
}

/// Per-request upstream timeout from `X-Request-Timeout-Ms`, capped by the
/// configured maximum.
fn request_timeout(headers: &HeaderMap, upstream: &UpstreamConfig) -> Result<Duration> {
    let requested = match headers.get(TIMEOUT_HEADER) {
        None => None,
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    Error::Validation("X-Request-Timeout-Ms must be a whole number of milliseconds".into())
                })?,
        ),
    };
    Ok(Duration::from_millis(upstream.effective_timeout_ms(requested)))
}

fn event_stream(stream: RelayStream) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_timeout(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TIMEOUT_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn timeout_header_overrides_default() {
        let cfg = UpstreamConfig::default();
        assert_eq!(
            request_timeout(&HeaderMap::new(), &cfg).unwrap(),
            Duration::from_millis(cfg.default_timeout_ms)
        );
        assert_eq!(
            request_timeout(&with_timeout("2500"), &cfg).unwrap(),
            Duration::from_millis(2_500)
        );
        assert_eq!(
            request_timeout(&with_timeout("99999999999"), &cfg).unwrap(),
            Duration::from_millis(cfg.max_timeout_ms)
        );
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        let cfg = UpstreamConfig::default();
        assert!(request_timeout(&with_timeout("soon"), &cfg).is_err());
        assert!(request_timeout(&with_timeout("-5"), &cfg).is_err());
    }
}

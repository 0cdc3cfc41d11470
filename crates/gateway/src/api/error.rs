//! Structured API errors and per-request correlation ids.
//!
//! Every error the gateway renders has the same shape:
//!
//! ```json
//! {"error": {"message": "...", "type": "...", "code": "...", "correlation_id": "..."}}
//! ```
//!
//! The correlation id is assigned by [`assign_correlation_id`] before any
//! handler runs and echoed in the `X-Correlation-Id` response header.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use mg_domain::error::Error;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Correlation id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id assigned by the middleware, or a fresh one when the
    /// middleware is not installed.
    pub fn from_parts(parts: &Parts) -> Self {
        parts
            .extensions
            .get::<CorrelationId>()
            .cloned()
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CorrelationId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// Axum middleware that assigns a fresh correlation id to every request and
/// echoes it in the `X-Correlation-Id` response header.
pub async fn assign_correlation_id(mut req: Request<Body>, next: Next) -> Response {
    let cid = CorrelationId::generate();
    req.extensions_mut().insert(cid.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(cid.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ApiError
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    correlation_id: String,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        cid: &CorrelationId,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            correlation_id: cid.0.clone(),
        }
    }

    pub fn from_error(error: Error, cid: &CorrelationId) -> Self {
        let status = status_for(&error);
        let message = match &error {
            // Internal details stay in the logs.
            Error::Io(_) | Error::Other(_) => {
                tracing::error!(correlation_id = %cid, error = %error, "internal error");
                "internal server error".to_string()
            }
            _ => error.to_string(),
        };
        Self::new(status, error.code(), message, cid)
    }

    pub fn unauthorized(message: impl Into<String>, cid: &CorrelationId) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message, cid)
    }

    pub fn forbidden(message: impl Into<String>, cid: &CorrelationId) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message, cid)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

/// HTTP status for each error class.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Credential(_) => StatusCode::BAD_GATEWAY,
        Error::Resolution { .. } => StatusCode::NOT_FOUND,
        Error::Upstream { .. } => StatusCode::BAD_REQUEST,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::StreamAborted { .. } | Error::Io(_) | Error::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = if self.status.is_server_error() {
            "server_error"
        } else {
            "invalid_request_error"
        };
        let body = serde_json::json!({
            "error": {
                "message": self.message,
                "type": kind,
                "code": self.code,
                "correlation_id": self.correlation_id,
            }
        });
        let mut response = (self.status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}

/// Attach the request's correlation id to a domain result.
pub trait ApiResultExt<T> {
    fn or_api(self, cid: &CorrelationId) -> Result<T, ApiError>;
}

impl<T> ApiResultExt<T> for mg_domain::error::Result<T> {
    fn or_api(self, cid: &CorrelationId) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::from_error(e, cid))
    }
}

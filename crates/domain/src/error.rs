/// Shared error type used across all ModelGate crates.
///
/// The first five variants form the routing taxonomy. Everything before a
/// stream is flushed (`Configuration`, `Credential`, `Resolution`,
/// non-streaming `Upstream`) is converted into a structured JSON error by
/// the gateway; `StreamAborted` is only ever logged.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Platform misconfiguration (e.g. the vault secret is missing).
    #[error("configuration: {0}")]
    Configuration(String),

    /// Ciphertext is malformed or failed authentication. Messages must never
    /// carry plaintext or key material.
    #[error("credential: {0}")]
    Credential(String),

    /// No active provider visible to the caller serves the model.
    #[error("no provider serves model '{model_key}' for this caller")]
    Resolution { model_key: String },

    /// Non-2xx, malformed response or transport failure from a provider.
    #[error("provider {provider}: {message}")]
    Upstream {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Failure or cancellation after response headers were flushed.
    #[error("stream {correlation_id} aborted: {reason}")]
    StreamAborted {
        correlation_id: String,
        reason: String,
    },

    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable, machine-readable code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration_error",
            Error::Credential(_) => "credential_error",
            Error::Resolution { .. } => "model_not_found",
            Error::Upstream { .. } => "upstream_error",
            Error::Timeout(_) => "upstream_timeout",
            Error::StreamAborted { .. } => "stream_aborted",
            Error::Validation(_) | Error::Json(_) => "validation_error",
            Error::Conflict(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::Io(_) | Error::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::Resolution {
                model_key: "gpt-4o".into()
            }
            .code(),
            "model_not_found"
        );
        assert_eq!(Error::Credential("bad tag".into()).code(), "credential_error");
        assert_eq!(
            Error::Upstream {
                provider: "p".into(),
                status: Some(500),
                message: "boom".into()
            }
            .code(),
            "upstream_error"
        );
    }

    #[test]
    fn resolution_message_names_model() {
        let err = Error::Resolution {
            model_key: "gpt-4o-mini".into(),
        };
        assert!(err.to_string().contains("gpt-4o-mini"));
    }
}

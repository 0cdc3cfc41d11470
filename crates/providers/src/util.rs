//! Shared utility functions for the provider crate.

use mg_domain::error::Error;

/// Upper bound on how much of an upstream error body is kept in messages.
const MAX_ERROR_BODY: usize = 2048;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Upstream`] attributed to `provider`.
pub(crate) fn from_reqwest(provider: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("provider {provider}: {e}"))
    } else {
        Error::Upstream {
            provider: provider.to_string(),
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Build an [`Error::Upstream`] from a non-2xx response body.
pub(crate) fn upstream_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    Error::Upstream {
        provider: provider.to_string(),
        status: Some(status.as_u16()),
        message: format!("HTTP {} - {}", status.as_u16(), truncate(body, MAX_ERROR_BODY)),
    }
}

/// Truncate `s` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Whether a decrypted credential means "send no Authorization header".
pub fn is_absent_credential(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || key.eq_ignore_ascii_case("none")
}

/// Display hint for an API key: the last four characters, or `****` for keys
/// too short to reveal anything. Returns `None` for absent credentials.
pub fn api_key_hint(key: &str) -> Option<String> {
    let key = key.trim();
    if is_absent_credential(key) {
        return None;
    }
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return Some("****".into());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    Some(format!("...{tail}"))
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP listener and inbound request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8620")]
    pub port: u16,
    /// Env var holding the bearer token for every `/v1` route except
    /// health. Unset or empty leaves the API open.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub limits: RequestLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_8620(),
            api_token_env: d_api_token_env(),
            cors: CorsConfig::default(),
            limits: RequestLimits::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Backpressure on inbound traffic. Streaming completions hold their slot
/// for the whole relay, so `max_concurrent_requests` bounds open upstream
/// connections too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLimits {
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
    /// Largest accepted request body, 8 MiB by default.
    #[serde(default = "d_body_bytes")]
    pub max_body_bytes: usize,
    /// Per-client-IP token bucket. Absent means no throttling.
    #[serde(default)]
    pub per_ip: Option<RateLimitConfig>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_concurrent_requests: d_256(),
            max_body_bytes: d_body_bytes(),
            per_ip: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, `scheme://host:*` for any port, or `["*"]`.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8620() -> u16 {
    8620
}
fn d_256() -> usize {
    256
}
fn d_body_bytes() -> usize {
    8 * 1024 * 1024
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_api_token_env() -> String {
    "MG_API_TOKEN".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_uses_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8620");
        assert_eq!(cfg.api_token_env, "MG_API_TOKEN");
        assert_eq!(cfg.limits.max_concurrent_requests, 256);
        assert_eq!(cfg.limits.max_body_bytes, 8 * 1024 * 1024);
        assert!(cfg.limits.per_ip.is_none());
    }

    #[test]
    fn per_ip_throttle_parses() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            host = "0.0.0.0"

            [limits]
            max_body_bytes = 1024

            [limits.per_ip]
            requests_per_second = 20
            burst_size = 40
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8620");
        assert_eq!(cfg.limits.max_body_bytes, 1024);
        let per_ip = cfg.limits.per_ip.unwrap();
        assert_eq!(per_ip.requests_per_second, 20);
        assert_eq!(per_ip.burst_size, 40);
    }
}

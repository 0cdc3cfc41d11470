use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential vault
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Environment variable holding the process-wide key-derivation secret.
    /// When unset, every credential encrypt/decrypt fails with a
    /// configuration error.
    #[serde(default = "d_secret_env")]
    pub secret_env: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            secret_env: d_secret_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Whole-request timeout when the caller supplies none. Streaming
    /// responses are bounded by this as well, so keep it generous.
    #[serde(default = "d_600000")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_10000")]
    pub connect_timeout_ms: u64,
    /// Upper bound on a caller-supplied `X-Request-Timeout-Ms`.
    #[serde(default = "d_900000")]
    pub max_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_600000(),
            connect_timeout_ms: d_10000(),
            max_timeout_ms: d_900000(),
        }
    }
}

impl UpstreamConfig {
    /// Resolve the effective per-request timeout in milliseconds.
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(0) | None => self.default_timeout_ms,
            Some(ms) => ms.min(self.max_timeout_ms),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tenancy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TenancyConfig {
    /// Organization used when a request carries no `X-Organization-Id`.
    #[serde(default)]
    pub default_organization_id: Option<i64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog refresh
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Run the periodic whole-fleet model refresh.
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_900")]
    pub interval_secs: u64,
    /// TTL of the refresh lock. A crashed holder's lock expires after this.
    #[serde(default = "d_900")]
    pub lock_ttl_secs: u64,
    /// Name of the refresh lock shared by every worker.
    #[serde(default = "d_lock_name")]
    pub lock_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            lock_ttl_secs: 900,
            lock_name: d_lock_name(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_secret_env() -> String {
    "MG_VAULT_SECRET".into()
}
fn d_600000() -> u64 {
    600_000
}
fn d_900000() -> u64 {
    900_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_900() -> u64 {
    900
}
fn d_true() -> bool {
    true
}
fn d_lock_name() -> String {
    "catalog-refresh".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_timeout_defaults_and_caps() {
        let cfg = UpstreamConfig::default();
        assert_eq!(cfg.effective_timeout_ms(None), 600_000);
        assert_eq!(cfg.effective_timeout_ms(Some(0)), 600_000);
        assert_eq!(cfg.effective_timeout_ms(Some(1_500)), 1_500);
        assert_eq!(cfg.effective_timeout_ms(Some(u64::MAX)), 900_000);
    }

    #[test]
    fn sync_deserializes_partial() {
        let cfg: SyncConfig = toml::from_str("interval_secs = 60").unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.interval_secs, 60);
        assert_eq!(cfg.lock_ttl_secs, 900);
        assert_eq!(cfg.lock_name, "catalog-refresh");
    }

    #[test]
    fn vault_default_env() {
        assert_eq!(VaultConfig::default().secret_env, "MG_VAULT_SECRET");
    }

    #[test]
    fn tenancy_parses_default_org() {
        let cfg: TenancyConfig = toml::from_str("default_organization_id = 7").unwrap();
        assert_eq!(cfg.default_organization_id, Some(7));
    }
}

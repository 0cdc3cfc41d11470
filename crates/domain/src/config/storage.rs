use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the registry snapshot and lock files.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Persist the in-memory store to `state_path/state.json`. When false the
    /// registry lives only for the lifetime of the process.
    #[serde(default = "d_true")]
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            persist: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Caches
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for cached accessible-provider sets. `0` disables the cache.
    #[serde(default = "d_30")]
    pub accessible_providers_ttl_secs: u64,
    #[serde(default = "d_1024")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            accessible_providers_ttl_secs: 30,
            max_entries: 1024,
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
fn d_true() -> bool {
    true
}
fn d_30() -> u64 {
    30
}
fn d_1024() -> usize {
    1024
}

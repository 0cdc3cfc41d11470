//! AppState construction and background-task spawning.
//!
//! Every service is built explicitly here at process start and handed to the
//! handlers through [`AppState`]; nothing is looked up at runtime.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mg_domain::config::{Config, ConfigSeverity};
use mg_providers::{
    CatalogRefresher, ClientFactory, CompletionRouter, FileLockManager, LockManager,
    MemoryLockManager, MemoryStore, ModelCatalogService, ProviderRegistry, Vault,
};

use crate::api::auth::token_hash_from_env;
use crate::state::AppState;
use crate::tenancy::{HeaderScopeResolver, ScopeResolver};

/// The swappable pieces of the runtime. Production wiring builds these from
/// config; tests inject their own.
pub struct Components {
    pub store: Arc<MemoryStore>,
    pub vault: Vault,
    pub locks: Arc<dyn LockManager>,
    pub scopes: Arc<dyn ScopeResolver>,
    pub api_token_hash: Option<Vec<u8>>,
    pub admin_token_hash: Option<Vec<u8>>,
}

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Credential vault ─────────────────────────────────────────────
    let vault = Vault::from_env(&config.vault.secret_env);

    // ── Persistence ──────────────────────────────────────────────────
    let state_path = &config.storage.state_path;
    let store = if config.storage.persist {
        let store = MemoryStore::open(state_path)
            .with_context(|| format!("opening state in {}", state_path.display()))?;
        tracing::info!(path = %state_path.display(), "state store ready");
        store
    } else {
        tracing::info!("state persistence disabled, using in-memory store");
        MemoryStore::new()
    };

    // ── Background-work locks ────────────────────────────────────────
    // Lock files live next to state.json; without persistence they stay in-process.
    let locks: Arc<dyn LockManager> = if config.storage.persist {
        let lock_dir = state_path.join("locks");
        Arc::new(
            FileLockManager::new(&lock_dir)
                .with_context(|| format!("creating lock directory {}", lock_dir.display()))?,
        )
    } else {
        Arc::new(MemoryLockManager::new())
    };

    // ── API / admin tokens (read once, hashed) ───────────────────────
    let api_token_hash = token_hash_from_env(&config.server.api_token_env, "API");
    let admin_token_hash = token_hash_from_env(&config.admin.token_env, "admin");
    if api_token_hash.is_some() && admin_token_hash.is_none() {
        tracing::warn!(
            env_var = %config.admin.token_env,
            "API token set without an admin token: global provider writes, \
             cross-scope writes, catalog edits and manual refresh are disabled"
        );
    }

    let scopes = Arc::new(HeaderScopeResolver::new(
        config.tenancy.default_organization_id,
    ));

    compose(
        config,
        Components {
            store: Arc::new(store),
            vault,
            locks,
            scopes,
            api_token_hash,
            admin_token_hash,
        },
    )
}

/// Wire the services together from already-built components.
pub fn compose(config: Arc<Config>, components: Components) -> anyhow::Result<AppState> {
    let Components {
        store,
        vault,
        locks,
        scopes,
        api_token_hash,
        admin_token_hash,
    } = components;

    let clients = Arc::new(
        ClientFactory::new(vault.clone(), &config.upstream)
            .context("building outbound HTTP client")?,
    );
    let registry = Arc::new(ProviderRegistry::new(
        store.clone(),
        store.clone(),
        vault,
        &config.cache,
    ));
    let catalog = Arc::new(ModelCatalogService::new(store.clone()));
    let router = Arc::new(CompletionRouter::new(registry.clone(), clients.clone()));
    let refresher = Arc::new(CatalogRefresher::new(
        registry.clone(),
        clients.clone(),
        locks,
        config.sync.clone(),
    ));
    tracing::info!(
        default_timeout_ms = config.upstream.default_timeout_ms,
        cache_ttl_secs = config.cache.accessible_providers_ttl_secs,
        "provider registry and completion router ready"
    );

    Ok(AppState {
        config,
        store,
        registry,
        catalog,
        clients,
        router,
        refresher,
        scopes,
        api_token_hash,
        admin_token_hash,
        started_at: Instant::now(),
    })
}

/// Spawn the periodic background loops. All of them stop when `cancel`
/// fires; the returned handles let the caller wait for them.
pub fn spawn_background_tasks(state: &AppState, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // ── Catalog refresh (lock-guarded, whole fleet) ──────────────────
    if state.config.sync.enabled {
        let refresher = state.refresher.clone();
        handles.push(tokio::spawn(refresher.run(cancel.clone())));
        tracing::info!(
            interval_secs = state.config.sync.interval_secs,
            lock = %state.config.sync.lock_name,
            "catalog refresher started"
        );
    } else {
        tracing::info!("catalog refresh disabled ([sync] enabled = false)");
    }

    // ── Periodic state flush ─────────────────────────────────────────
    if state.store.persist_path().is_some() {
        let store = state.store.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        if let Err(e) = store.flush().await {
                            tracing::warn!(error = %e, "periodic state flush failed");
                        }
                    }
                }
            }
        }));
    }

    tracing::info!(tasks = handles.len(), "background tasks spawned");
    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = build_app_state(Arc::new(config)).await.err().expect("expected config validation error");
        assert!(err.to_string().contains("config validation failed"));
    }

    #[tokio::test]
    async fn builds_with_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.state_path = dir.path().join("state");
        let state = build_app_state(Arc::new(config)).await.unwrap();
        assert!(state.store.persist_path().is_some());
        assert!(dir.path().join("state").join("locks").is_dir());
    }

    #[tokio::test]
    async fn ephemeral_state_touches_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.state_path = dir.path().join("state");
        config.storage.persist = false;
        let state = build_app_state(Arc::new(config)).await.unwrap();
        assert!(state.store.persist_path().is_none());
        assert!(!dir.path().join("state").exists());
    }

    #[tokio::test]
    async fn disabled_sync_spawns_only_the_flush_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.state_path = dir.path().to_path_buf();
        config.sync.enabled = false;
        let state = build_app_state(Arc::new(config)).await.unwrap();

        let cancel = CancellationToken::new();
        let handles = spawn_background_tasks(&state, cancel.clone());
        assert_eq!(handles.len(), 1);
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}

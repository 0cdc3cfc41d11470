use std::sync::Arc;
use std::time::Instant;

use mg_domain::config::Config;
use mg_providers::{
    CatalogRefresher, ClientFactory, CompletionRouter, MemoryStore, ModelCatalogService,
    ProviderRegistry,
};

use crate::tenancy::ScopeResolver;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services**: config, store, registry, catalog, router
/// - **Background work**: catalog refresher
/// - **Security**: scope resolver and token hashes
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Concrete store handle, kept for flushing on shutdown. The registry
    /// and catalog only see it through the repository traits.
    pub store: Arc<MemoryStore>,
    pub registry: Arc<ProviderRegistry>,
    pub catalog: Arc<ModelCatalogService>,
    pub clients: Arc<ClientFactory>,
    pub router: Arc<CompletionRouter>,

    // ── Background work ───────────────────────────────────────────────
    pub refresher: Arc<CatalogRefresher>,

    // ── Security (startup-computed) ───────────────────────────────────
    pub scopes: Arc<dyn ScopeResolver>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// SHA-256 hash of the admin bearer token (read once at startup).
    /// `None` = dev mode (admin endpoints accessible without auth).
    pub admin_token_hash: Option<Vec<u8>>,

    pub started_at: Instant,
}

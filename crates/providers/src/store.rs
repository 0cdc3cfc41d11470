//! Persistence repositories for providers, provider models and the catalog.
//!
//! The registry and catalog service talk to storage only through
//! [`ProviderStore`] and [`CatalogStore`]. Each call is atomic on its own;
//! uniqueness constraints are enforced inside the call.
//!
//! [`MemoryStore`] keeps everything in memory and, when opened with a state
//! directory, writes a JSON snapshot after every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mg_domain::error::{Error, Result};
use mg_domain::provider::{
    CatalogDraft, CatalogFilter, ModelCatalog, Page, Provider, ProviderDraft, ProviderFilter,
    ProviderModel, ProviderModelDraft,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Persist a new provider. Fails with `Conflict` when
    /// `(organization_id, slug)` is taken.
    async fn insert_provider(&self, draft: ProviderDraft) -> Result<Provider>;

    /// Set `last_synced_at` and nothing else.
    async fn mark_provider_synced(&self, id: i64, at: DateTime<Utc>) -> Result<Provider>;

    /// Set the `active` flag and nothing else.
    async fn set_provider_active(&self, id: i64, active: bool) -> Result<Provider>;

    /// Replace the credential ciphertext and its hint and nothing else.
    async fn set_provider_credential(
        &self,
        id: i64,
        encrypted_api_key: String,
        api_key_hint: Option<String>,
    ) -> Result<Provider>;

    async fn provider_by_id(&self, id: i64) -> Result<Option<Provider>>;

    async fn provider_by_public_id(&self, public_id: Uuid) -> Result<Option<Provider>>;

    async fn provider_by_slug(
        &self,
        organization_id: Option<i64>,
        slug: &str,
    ) -> Result<Option<Provider>>;

    /// Providers matching `filter`, ordered by id.
    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>>;

    async fn count_providers(&self, filter: &ProviderFilter) -> Result<usize>;

    /// All ProviderModel rows of one provider, active or not, ordered by id.
    async fn provider_models(&self, provider_id: i64) -> Result<Vec<ProviderModel>>;

    /// Active ProviderModel rows for `model_key` across all providers.
    async fn active_models_by_key(&self, model_key: &str) -> Result<Vec<ProviderModel>>;

    /// Fails with `Conflict` when `(provider_id, model_key)` exists.
    async fn insert_provider_model(&self, draft: ProviderModelDraft) -> Result<ProviderModel>;

    async fn update_provider_model(&self, model: ProviderModel) -> Result<ProviderModel>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fails with `Conflict` when the model key is already catalogued.
    async fn insert_catalog(&self, draft: CatalogDraft) -> Result<ModelCatalog>;

    async fn update_catalog(&self, entry: ModelCatalog) -> Result<ModelCatalog>;

    async fn catalog_by_id(&self, id: i64) -> Result<Option<ModelCatalog>>;

    async fn catalog_by_public_id(&self, public_id: Uuid) -> Result<Option<ModelCatalog>>;

    async fn catalog_by_key(&self, model_key: &str) -> Result<Option<ModelCatalog>>;

    async fn list_catalog(&self, filter: &CatalogFilter, page: Page) -> Result<Vec<ModelCatalog>>;

    async fn count_catalog(&self, filter: &CatalogFilter) -> Result<usize>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const STATE_FILE: &str = "state.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    providers: BTreeMap<i64, Provider>,
    #[serde(default)]
    provider_models: BTreeMap<i64, ProviderModel>,
    #[serde(default)]
    catalog: BTreeMap<i64, ModelCatalog>,
    #[serde(default)]
    next_provider_id: i64,
    #[serde(default)]
    next_model_id: i64,
    #[serde(default)]
    next_catalog_id: i64,
}

impl Snapshot {
    /// Make sure id counters are ahead of every stored row.
    fn repair_counters(&mut self) {
        let max = |keys: Option<&i64>| keys.copied().unwrap_or(0);
        self.next_provider_id = self
            .next_provider_id
            .max(max(self.providers.keys().next_back()));
        self.next_model_id = self
            .next_model_id
            .max(max(self.provider_models.keys().next_back()));
        self.next_catalog_id = self
            .next_catalog_id
            .max(max(self.catalog.keys().next_back()));
    }
}

pub struct MemoryStore {
    inner: RwLock<Snapshot>,
    persist_path: Option<PathBuf>,
    /// Serialises snapshot writes so an older snapshot never lands last.
    write_lock: tokio::sync::Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An ephemeral store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Snapshot::default()),
            persist_path: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a persistent store rooted at `state_path`, loading
    /// `state.json` when present.
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let persist_path = state_path.join(STATE_FILE);

        let mut snapshot = match std::fs::read_to_string(&persist_path) {
            Ok(data) => serde_json::from_str::<Snapshot>(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        snapshot.repair_counters();

        tracing::info!(
            path = %persist_path.display(),
            providers = snapshot.providers.len(),
            provider_models = snapshot.provider_models.len(),
            catalog = snapshot.catalog.len(),
            "loaded registry state"
        );

        Ok(Self {
            inner: RwLock::new(snapshot),
            persist_path: Some(persist_path),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Write the current snapshot to disk. No-op for ephemeral stores.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = self.persist_path.clone() else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_vec_pretty(&*self.inner.read())?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| Error::Other(format!("state writer panicked: {e}")))?
    }

    /// Apply `change` to one provider row under the write lock, then persist.
    /// Concurrent field-level changes to the same row never overwrite each
    /// other.
    async fn modify_provider(&self, id: i64, change: impl FnOnce(&mut Provider)) -> Result<Provider> {
        let provider = {
            let mut state = self.inner.write();
            let Some(slot) = state.providers.get_mut(&id) else {
                return Err(Error::NotFound(format!("provider {id}")));
            };
            change(slot);
            slot.updated_at = Utc::now();
            slot.clone()
        };
        self.persist().await;
        Ok(provider)
    }

    /// Write-through after a mutation. Failures are logged, not returned:
    /// the in-memory state stays authoritative until the next flush.
    async fn persist(&self) {
        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "failed to persist registry state");
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn insert_provider(&self, draft: ProviderDraft) -> Result<Provider> {
        let provider = {
            let mut state = self.inner.write();
            if state
                .providers
                .values()
                .any(|p| p.organization_id == draft.organization_id && p.slug == draft.slug)
            {
                return Err(Error::Conflict(format!(
                    "provider slug '{}' already exists in this scope",
                    draft.slug
                )));
            }
            state.next_provider_id += 1;
            let now = Utc::now();
            let provider = Provider {
                id: state.next_provider_id,
                public_id: draft.public_id,
                slug: draft.slug,
                name: draft.name,
                organization_id: draft.organization_id,
                project_id: draft.project_id,
                kind: draft.kind,
                base_url: draft.base_url,
                encrypted_api_key: draft.encrypted_api_key,
                api_key_hint: draft.api_key_hint,
                active: true,
                is_moderated: draft.is_moderated,
                metadata: draft.metadata,
                last_synced_at: None,
                created_at: now,
                updated_at: now,
            };
            state.providers.insert(provider.id, provider.clone());
            provider
        };
        self.persist().await;
        Ok(provider)
    }

    async fn mark_provider_synced(&self, id: i64, at: DateTime<Utc>) -> Result<Provider> {
        self.modify_provider(id, |p| p.last_synced_at = Some(at)).await
    }

    async fn set_provider_active(&self, id: i64, active: bool) -> Result<Provider> {
        self.modify_provider(id, |p| p.active = active).await
    }

    async fn set_provider_credential(
        &self,
        id: i64,
        encrypted_api_key: String,
        api_key_hint: Option<String>,
    ) -> Result<Provider> {
        self.modify_provider(id, move |p| {
            p.encrypted_api_key = encrypted_api_key;
            p.api_key_hint = api_key_hint;
        })
        .await
    }

    async fn provider_by_id(&self, id: i64) -> Result<Option<Provider>> {
        Ok(self.inner.read().providers.get(&id).cloned())
    }

    async fn provider_by_public_id(&self, public_id: Uuid) -> Result<Option<Provider>> {
        Ok(self
            .inner
            .read()
            .providers
            .values()
            .find(|p| p.public_id == public_id)
            .cloned())
    }

    async fn provider_by_slug(
        &self,
        organization_id: Option<i64>,
        slug: &str,
    ) -> Result<Option<Provider>> {
        Ok(self
            .inner
            .read()
            .providers
            .values()
            .find(|p| p.organization_id == organization_id && p.slug == slug)
            .cloned())
    }

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>> {
        Ok(self
            .inner
            .read()
            .providers
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn count_providers(&self, filter: &ProviderFilter) -> Result<usize> {
        Ok(self
            .inner
            .read()
            .providers
            .values()
            .filter(|p| filter.matches(p))
            .count())
    }

    async fn provider_models(&self, provider_id: i64) -> Result<Vec<ProviderModel>> {
        Ok(self
            .inner
            .read()
            .provider_models
            .values()
            .filter(|m| m.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn active_models_by_key(&self, model_key: &str) -> Result<Vec<ProviderModel>> {
        Ok(self
            .inner
            .read()
            .provider_models
            .values()
            .filter(|m| m.active && m.model_key == model_key)
            .cloned()
            .collect())
    }

    async fn insert_provider_model(&self, draft: ProviderModelDraft) -> Result<ProviderModel> {
        let model = {
            let mut state = self.inner.write();
            if !state.providers.contains_key(&draft.provider_id) {
                return Err(Error::NotFound(format!("provider {}", draft.provider_id)));
            }
            if state
                .provider_models
                .values()
                .any(|m| m.provider_id == draft.provider_id && m.model_key == draft.model_key)
            {
                return Err(Error::Conflict(format!(
                    "model '{}' already exists for provider {}",
                    draft.model_key, draft.provider_id
                )));
            }
            state.next_model_id += 1;
            let now = Utc::now();
            let model = ProviderModel {
                id: state.next_model_id,
                provider_id: draft.provider_id,
                model_catalog_id: draft.model_catalog_id,
                model_key: draft.model_key,
                supports_images: draft.supports_images,
                supports_embeddings: draft.supports_embeddings,
                supports_reasoning: draft.supports_reasoning,
                active: draft.active,
                created_at: now,
                updated_at: now,
            };
            state.provider_models.insert(model.id, model.clone());
            model
        };
        self.persist().await;
        Ok(model)
    }

    async fn update_provider_model(&self, mut model: ProviderModel) -> Result<ProviderModel> {
        {
            let mut state = self.inner.write();
            let Some(slot) = state.provider_models.get_mut(&model.id) else {
                return Err(Error::NotFound(format!("provider model {}", model.id)));
            };
            model.updated_at = Utc::now();
            *slot = model.clone();
        }
        self.persist().await;
        Ok(model)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_catalog(&self, draft: CatalogDraft) -> Result<ModelCatalog> {
        let entry = {
            let mut state = self.inner.write();
            if state.catalog.values().any(|c| c.model_key == draft.model_key) {
                return Err(Error::Conflict(format!(
                    "catalog entry '{}' already exists",
                    draft.model_key
                )));
            }
            state.next_catalog_id += 1;
            let now = Utc::now();
            let entry = ModelCatalog {
                id: state.next_catalog_id,
                public_id: draft.public_id,
                model_key: draft.model_key,
                display_name: draft.display_name,
                description: draft.description,
                status: draft.status,
                is_moderated: draft.is_moderated,
                created_at: now,
                updated_at: now,
            };
            state.catalog.insert(entry.id, entry.clone());
            entry
        };
        self.persist().await;
        Ok(entry)
    }

    async fn update_catalog(&self, mut entry: ModelCatalog) -> Result<ModelCatalog> {
        {
            let mut state = self.inner.write();
            let Some(slot) = state.catalog.get_mut(&entry.id) else {
                return Err(Error::NotFound(format!("catalog entry {}", entry.id)));
            };
            entry.updated_at = Utc::now();
            *slot = entry.clone();
        }
        self.persist().await;
        Ok(entry)
    }

    async fn catalog_by_id(&self, id: i64) -> Result<Option<ModelCatalog>> {
        Ok(self.inner.read().catalog.get(&id).cloned())
    }

    async fn catalog_by_public_id(&self, public_id: Uuid) -> Result<Option<ModelCatalog>> {
        Ok(self
            .inner
            .read()
            .catalog
            .values()
            .find(|c| c.public_id == public_id)
            .cloned())
    }

    async fn catalog_by_key(&self, model_key: &str) -> Result<Option<ModelCatalog>> {
        Ok(self
            .inner
            .read()
            .catalog
            .values()
            .find(|c| c.model_key == model_key)
            .cloned())
    }

    async fn list_catalog(&self, filter: &CatalogFilter, page: Page) -> Result<Vec<ModelCatalog>> {
        let page = page.clamped();
        Ok(self
            .inner
            .read()
            .catalog
            .values()
            .filter(|c| filter.matches(c))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn count_catalog(&self, filter: &CatalogFilter) -> Result<usize> {
        Ok(self
            .inner
            .read()
            .catalog
            .values()
            .filter(|c| filter.matches(c))
            .count())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

//! Provider registry.
//!
//! Owns the Provider and ProviderModel rows: registration with encrypted
//! credentials, scope-aware visibility, model-to-provider resolution and the
//! catalog sync that reconciles a provider's advertised models.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mg_domain::config::CacheConfig;
use mg_domain::error::{Error, Result};
use mg_domain::provider::{
    CallerScope, CatalogStatus, DiscoveredModel, NewProvider, Provider, ProviderDraft,
    ProviderFilter, ProviderKind, ProviderModel, ProviderModelDraft, ScopeTier, SyncResult,
};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::client::ClientFactory;
use crate::store::{CatalogStore, ProviderStore};
use crate::util::{api_key_hint, is_absent_credential};
use crate::vault::Vault;

/// Cache key for accessible-provider sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccessKey {
    organization_id: i64,
    project_ids: Vec<i64>,
}

impl AccessKey {
    fn new(organization_id: i64, project_ids: &[i64]) -> Self {
        let mut project_ids = project_ids.to_vec();
        project_ids.sort_unstable();
        project_ids.dedup();
        Self {
            organization_id,
            project_ids,
        }
    }

    /// Whether a cached set for this key could contain `provider`.
    fn may_see(&self, provider: &Provider) -> bool {
        match (provider.organization_id, provider.project_id) {
            (None, None) => true,
            (Some(org), None) => org == self.organization_id,
            (_, Some(project)) => self.project_ids.contains(&project),
        }
    }
}

/// Resolution rank: higher wins. Tier first, then most recent sync, then
/// lowest id.
type Rank = (ScopeTier, Option<DateTime<Utc>>, Reverse<i64>);

/// The tier at which `provider` serves a caller in `org_id` acting on
/// `project_id`, or `None` when it does not serve that caller.
fn caller_tier(provider: &Provider, org_id: i64, project_id: Option<i64>) -> Option<ScopeTier> {
    match (provider.organization_id, provider.project_id) {
        (_, Some(pid)) => (project_id == Some(pid)).then_some(ScopeTier::Project),
        (Some(org), None) => (org == org_id).then_some(ScopeTier::Organization),
        (None, None) => Some(ScopeTier::Global),
    }
}

fn rank(provider: &Provider, tier: ScopeTier) -> Rank {
    (tier, provider.last_synced_at, Reverse(provider.id))
}

/// A routable model together with the provider that wins it for a caller.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedModel {
    pub model: ProviderModel,
    pub provider: Provider,
    pub tier: ScopeTier,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderRegistry {
    store: Arc<dyn ProviderStore>,
    catalog: Arc<dyn CatalogStore>,
    vault: Vault,
    accessible: TtlCache<AccessKey, Arc<Vec<Provider>>>,
}

impl ProviderRegistry {
    pub fn new(
        store: Arc<dyn ProviderStore>,
        catalog: Arc<dyn CatalogStore>,
        vault: Vault,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            vault,
            accessible: TtlCache::new(
                Duration::from_secs(cache.accessible_providers_ttl_secs),
                cache.max_entries,
            ),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProviderStore> {
        &self.store
    }

    // ── Registration ───────────────────────────────────────────────

    /// Validate, encrypt the credential and persist a new provider.
    pub async fn register_provider(&self, input: NewProvider) -> Result<Provider> {
        validate_scope(input.organization_id, input.project_id)?;
        validate_slug(&input.slug)?;

        let name = input.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }

        let descriptor = input.kind.descriptor();
        let base_url = match input.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => descriptor
                .default_base_url
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "base_url is required for {} providers",
                        descriptor.display_name
                    ))
                })?,
        };
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Validation(
                "base_url must be an http:// or https:// URL".into(),
            ));
        }

        require_credential(&input.kind, input.api_key.as_deref())?;

        if self
            .store
            .provider_by_slug(input.organization_id, &input.slug)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "provider slug '{}' already exists in this scope",
                input.slug
            )));
        }

        let (encrypted_api_key, hint) = self.seal_credential(input.api_key.as_deref())?;

        let provider = self
            .store
            .insert_provider(ProviderDraft {
                public_id: Uuid::new_v4(),
                slug: input.slug,
                name: name.to_string(),
                organization_id: input.organization_id,
                project_id: input.project_id,
                kind: input.kind,
                base_url,
                encrypted_api_key,
                api_key_hint: hint,
                is_moderated: input.is_moderated,
                metadata: input.metadata,
            })
            .await?;

        self.invalidate_for(&provider);
        tracing::info!(
            provider = %provider.slug,
            provider_id = provider.id,
            kind = ?provider.kind,
            tier = ?provider.tier(),
            "registered provider"
        );
        Ok(provider)
    }

    fn seal_credential(&self, api_key: Option<&str>) -> Result<(String, Option<String>)> {
        match api_key.map(str::trim) {
            Some(key) if !key.is_empty() => Ok((self.vault.encrypt(key)?, api_key_hint(key))),
            _ => Ok((String::new(), None)),
        }
    }

    // ── Lookup ─────────────────────────────────────────────────────

    pub async fn get_provider(&self, public_id: Uuid) -> Result<Provider> {
        self.store
            .provider_by_public_id(public_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("provider {public_id}")))
    }

    /// Every provider visible to a caller in `org_id` with access to
    /// `project_ids`: global, org-scoped for `org_id`, and project-scoped for
    /// any listed project. No ordering guarantee.
    pub async fn list_accessible_providers(
        &self,
        org_id: i64,
        project_ids: &[i64],
    ) -> Result<Vec<Provider>> {
        let key = AccessKey::new(org_id, project_ids);
        if let Some(hit) = self.accessible.get(&key) {
            return Ok(hit.as_ref().clone());
        }

        let providers: Vec<Provider> = self
            .store
            .list_providers(&ProviderFilter::default())
            .await?
            .into_iter()
            .filter(|p| p.visible_to(org_id, &key.project_ids))
            .collect();

        self.accessible.insert(key, Arc::new(providers.clone()));
        Ok(providers)
    }

    pub async fn list_provider_models(&self, provider_id: i64) -> Result<Vec<ProviderModel>> {
        self.store.provider_models(provider_id).await
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Resolve the single provider that serves `model_key` for the caller.
    ///
    /// Project match for `project_id` beats organization match beats global.
    /// Within a tier the most recently synced provider wins, then the lowest
    /// id. Only active models of active providers count; moderated providers
    /// additionally need the model linked to an approved catalog entry.
    pub async fn get_provider_for_model(
        &self,
        model_key: &str,
        org_id: i64,
        project_id: Option<i64>,
    ) -> Result<Provider> {
        let candidates = self.store.active_models_by_key(model_key).await?;
        let mut approvals = HashMap::new();
        let mut best: Option<(Rank, Provider)> = None;

        for model in candidates {
            let Some(provider) = self.store.provider_by_id(model.provider_id).await? else {
                continue;
            };
            if !provider.active {
                continue;
            }
            let Some(tier) = caller_tier(&provider, org_id, project_id) else {
                continue;
            };
            if provider.is_moderated && !self.is_approved(&model, &mut approvals).await? {
                continue;
            }

            let r = rank(&provider, tier);
            if best.as_ref().map_or(true, |(b, _)| r > *b) {
                best = Some((r, provider));
            }
        }

        match best {
            Some((_, provider)) => {
                tracing::debug!(
                    model = %model_key,
                    provider = %provider.slug,
                    tier = ?provider.tier(),
                    "resolved provider for model"
                );
                Ok(provider)
            }
            None => Err(Error::Resolution {
                model_key: model_key.to_string(),
            }),
        }
    }

    /// Every model routable for `scope`, each paired with its winning
    /// provider. Sorted by model key.
    pub async fn list_accessible_models(&self, scope: &CallerScope) -> Result<Vec<ResolvedModel>> {
        let providers = self
            .list_accessible_providers(scope.organization_id, &scope.accessible_project_ids)
            .await?;

        let mut approvals = HashMap::new();
        let mut best: BTreeMap<String, (Rank, ResolvedModel)> = BTreeMap::new();

        for provider in providers.into_iter().filter(|p| p.active) {
            let Some(tier) = caller_tier(&provider, scope.organization_id, scope.project_id)
            else {
                continue;
            };
            let r = rank(&provider, tier);
            for model in self.store.provider_models(provider.id).await? {
                if !model.active {
                    continue;
                }
                if provider.is_moderated && !self.is_approved(&model, &mut approvals).await? {
                    continue;
                }
                let replace = best
                    .get(&model.model_key)
                    .map_or(true, |(existing, _)| r > *existing);
                if replace {
                    best.insert(
                        model.model_key.clone(),
                        (
                            r,
                            ResolvedModel {
                                model,
                                provider: provider.clone(),
                                tier,
                            },
                        ),
                    );
                }
            }
        }

        Ok(best.into_values().map(|(_, m)| m).collect())
    }

    async fn is_approved(
        &self,
        model: &ProviderModel,
        memo: &mut HashMap<i64, bool>,
    ) -> Result<bool> {
        let Some(catalog_id) = model.model_catalog_id else {
            return Ok(false);
        };
        if let Some(&approved) = memo.get(&catalog_id) {
            return Ok(approved);
        }
        let approved = self
            .catalog
            .catalog_by_id(catalog_id)
            .await?
            .is_some_and(|c| c.status == CatalogStatus::Approved);
        memo.insert(catalog_id, approved);
        Ok(approved)
    }

    // ── Mutation ───────────────────────────────────────────────────

    pub async fn set_provider_active(&self, public_id: Uuid, active: bool) -> Result<Provider> {
        let provider = self.get_provider(public_id).await?;
        if provider.active == active {
            return Ok(provider);
        }
        let provider = self.store.set_provider_active(provider.id, active).await?;
        self.invalidate_for(&provider);
        tracing::info!(provider = %provider.slug, active, "provider activation changed");
        Ok(provider)
    }

    /// Replace the provider's credential. An empty key clears it, which is
    /// only allowed for kinds that work without one.
    pub async fn rotate_credential(&self, public_id: Uuid, api_key: &str) -> Result<Provider> {
        let provider = self.get_provider(public_id).await?;
        require_credential(&provider.kind, Some(api_key))?;
        let (encrypted, hint) = self.seal_credential(Some(api_key))?;
        let provider = self
            .store
            .set_provider_credential(provider.id, encrypted, hint)
            .await?;
        self.invalidate_for(&provider);
        tracing::info!(provider = %provider.slug, "provider credential rotated");
        Ok(provider)
    }

    /// Reconcile the provider's ProviderModel rows with `discovered`.
    ///
    /// Every discovered key ends up active (created or reactivated), with
    /// capability flags refreshed where the listing reported them; every
    /// other row of the provider is deactivated, never deleted. Rows are
    /// written only when they change.
    pub async fn sync_provider_models(
        &self,
        provider: &Provider,
        discovered: &[DiscoveredModel],
    ) -> Result<SyncResult> {
        let existing = self.store.provider_models(provider.id).await?;
        let by_key: HashMap<&str, &ProviderModel> = existing
            .iter()
            .map(|m| (m.model_key.as_str(), m))
            .collect();

        let mut result = SyncResult::default();
        let mut seen: HashSet<String> = HashSet::new();

        for entry in discovered {
            let key = entry.model_key.trim();
            if key.is_empty() || !seen.insert(key.to_string()) {
                continue;
            }
            let catalog_id = self.catalog.catalog_by_key(key).await?.map(|c| c.id);

            match by_key.get(key) {
                None => {
                    self.store
                        .insert_provider_model(ProviderModelDraft {
                            provider_id: provider.id,
                            model_catalog_id: catalog_id,
                            model_key: key.to_string(),
                            supports_images: entry.supports_images.unwrap_or(false),
                            supports_embeddings: entry.supports_embeddings.unwrap_or(false),
                            supports_reasoning: entry.supports_reasoning.unwrap_or(false),
                            active: true,
                        })
                        .await?;
                    result.created += 1;
                }
                Some(&row) => {
                    let mut next = row.clone();
                    next.active = true;
                    if let Some(v) = entry.supports_images {
                        next.supports_images = v;
                    }
                    if let Some(v) = entry.supports_embeddings {
                        next.supports_embeddings = v;
                    }
                    if let Some(v) = entry.supports_reasoning {
                        next.supports_reasoning = v;
                    }
                    if catalog_id.is_some() {
                        next.model_catalog_id = catalog_id;
                    }

                    if next == *row {
                        result.unchanged += 1;
                        continue;
                    }
                    if row.active {
                        result.updated += 1;
                    } else {
                        result.reactivated += 1;
                    }
                    self.store.update_provider_model(next).await?;
                }
            }
        }

        for row in existing.iter().filter(|m| !seen.contains(&m.model_key)) {
            if row.active {
                let mut next = row.clone();
                next.active = false;
                self.store.update_provider_model(next).await?;
                result.deactivated += 1;
            }
        }

        let current = self
            .store
            .mark_provider_synced(provider.id, Utc::now())
            .await?;
        self.invalidate_for(&current);

        tracing::info!(
            provider = %provider.slug,
            discovered = seen.len(),
            created = result.created,
            reactivated = result.reactivated,
            updated = result.updated,
            deactivated = result.deactivated,
            unchanged = result.unchanged,
            "provider models synced"
        );
        Ok(result)
    }

    /// Discover the provider's models through `clients` and sync them.
    pub async fn refresh_provider(
        &self,
        clients: &ClientFactory,
        provider: &Provider,
    ) -> Result<SyncResult> {
        let discovered = clients.list_models(provider).await?;
        self.sync_provider_models(provider, &discovered).await
    }

    /// Drop cached accessible sets that could contain `provider`.
    fn invalidate_for(&self, provider: &Provider) {
        let dropped = self.accessible.invalidate_where(|key| key.may_see(provider));
        if dropped > 0 {
            tracing::debug!(provider = %provider.slug, dropped, "invalidated accessible-provider cache");
        }
    }
}

// ── Validation ─────────────────────────────────────────────────────

fn validate_scope(organization_id: Option<i64>, project_id: Option<i64>) -> Result<()> {
    if project_id.is_some() && organization_id.is_none() {
        return Err(Error::Validation(
            "a project-scoped provider must belong to an organization".into(),
        ));
    }
    Ok(())
}

fn require_credential(kind: &ProviderKind, api_key: Option<&str>) -> Result<()> {
    let descriptor = kind.descriptor();
    if descriptor.requires_credential() && api_key.map_or(true, is_absent_credential) {
        return Err(Error::Validation(format!(
            "an API key is required for {} providers",
            descriptor.display_name
        )));
    }
    Ok(())
}

fn validate_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug.len() <= 64
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "invalid slug '{slug}': use 1-64 lowercase letters, digits or '-'"
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mg_domain::provider::CatalogDraft;

    fn registry() -> (ProviderRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = ProviderRegistry::new(
            store.clone(),
            store.clone(),
            Vault::new("test-secret"),
            &CacheConfig::default(),
        );
        (registry, store)
    }

    fn new_provider(slug: &str, org: Option<i64>, project: Option<i64>) -> NewProvider {
        NewProvider {
            slug: slug.into(),
            name: slug.to_uppercase(),
            organization_id: org,
            project_id: project,
            kind: ProviderKind::Openai,
            base_url: None,
            api_key: Some(format!("sk-{slug}-0123456789")),
            is_moderated: false,
            metadata: BTreeMap::new(),
        }
    }

    async fn with_model(registry: &ProviderRegistry, input: NewProvider, key: &str) -> Provider {
        let p = registry.register_provider(input).await.unwrap();
        registry
            .sync_provider_models(&p, &[DiscoveredModel::new(key)])
            .await
            .unwrap();
        registry.get_provider(p.public_id).await.unwrap()
    }

    #[tokio::test]
    async fn project_beats_org_beats_global() {
        let (registry, _) = registry();
        let global = with_model(&registry, new_provider("global", None, None), "m").await;
        let org = with_model(&registry, new_provider("org", Some(7), None), "m").await;
        let project = with_model(&registry, new_provider("proj", Some(7), Some(42)), "m").await;

        let hit = registry.get_provider_for_model("m", 7, Some(42)).await.unwrap();
        assert_eq!(hit.id, project.id);
        let hit = registry.get_provider_for_model("m", 7, None).await.unwrap();
        assert_eq!(hit.id, org.id);
        let hit = registry.get_provider_for_model("m", 8, None).await.unwrap();
        assert_eq!(hit.id, global.id);
        let hit = registry.get_provider_for_model("m", 7, Some(41)).await.unwrap();
        assert_eq!(hit.id, org.id);
    }

    #[tokio::test]
    async fn org_seven_project_forty_two_scenario() {
        let (registry, _) = registry();
        let p0 = with_model(&registry, new_provider("p0", None, None), "gpt-4o-mini").await;
        let p1 = with_model(&registry, new_provider("p1", Some(7), Some(42)), "gpt-4o-mini").await;

        let hit = registry
            .get_provider_for_model("gpt-4o-mini", 7, Some(42))
            .await
            .unwrap();
        assert_eq!(hit.id, p1.id);
        let hit = registry
            .get_provider_for_model("gpt-4o-mini", 7, None)
            .await
            .unwrap();
        assert_eq!(hit.id, p0.id);
    }

    #[tokio::test]
    async fn same_tier_prefers_recent_sync_then_lowest_id() {
        let (registry, store) = registry();
        let a = with_model(&registry, new_provider("a", None, None), "m").await;
        let b = with_model(&registry, new_provider("b", None, None), "m").await;

        // b synced last.
        let hit = registry.get_provider_for_model("m", 1, None).await.unwrap();
        assert_eq!(hit.id, b.id);

        // Identical sync times fall back to the lowest id.
        store
            .mark_provider_synced(a.id, b.last_synced_at.unwrap())
            .await
            .unwrap();
        let hit = registry.get_provider_for_model("m", 1, None).await.unwrap();
        assert_eq!(hit.id, a.id);
    }

    #[tokio::test]
    async fn inactive_provider_is_skipped() {
        let (registry, _) = registry();
        let global = with_model(&registry, new_provider("g", None, None), "m").await;
        let org = with_model(&registry, new_provider("o", Some(7), None), "m").await;
        registry.set_provider_active(org.public_id, false).await.unwrap();

        let hit = registry.get_provider_for_model("m", 7, None).await.unwrap();
        assert_eq!(hit.id, global.id);
    }

    #[tokio::test]
    async fn unknown_model_is_a_resolution_error() {
        let (registry, _) = registry();
        with_model(&registry, new_provider("p", Some(8), None), "m").await;
        let err = registry.get_provider_for_model("m", 7, None).await.unwrap_err();
        assert!(matches!(err, Error::Resolution { ref model_key } if model_key == "m"));
    }

    #[tokio::test]
    async fn moderated_provider_needs_approved_catalog_entry() {
        let (registry, store) = registry();
        let mut input = new_provider("mod", None, None);
        input.is_moderated = true;
        with_model(&registry, input, "m").await;
        assert!(registry.get_provider_for_model("m", 1, None).await.is_err());

        let entry = store
            .insert_catalog(CatalogDraft {
                public_id: Uuid::new_v4(),
                model_key: "m".into(),
                display_name: "M".into(),
                description: None,
                status: CatalogStatus::Approved,
                is_moderated: true,
            })
            .await
            .unwrap();
        let p = registry
            .list_accessible_providers(1, &[])
            .await
            .unwrap()
            .remove(0);
        registry
            .sync_provider_models(&p, &[DiscoveredModel::new("m")])
            .await
            .unwrap();

        let models = registry.list_provider_models(p.id).await.unwrap();
        assert_eq!(models[0].model_catalog_id, Some(entry.id));
        assert!(registry.get_provider_for_model("m", 1, None).await.is_ok());
    }

    #[tokio::test]
    async fn sync_is_idempotent() {
        let (registry, _) = registry();
        let p = registry
            .register_provider(new_provider("p", None, None))
            .await
            .unwrap();
        let discovered = vec![DiscoveredModel::new("a"), DiscoveredModel::new("b")];

        let first = registry.sync_provider_models(&p, &discovered).await.unwrap();
        assert_eq!(first.created, 2);
        let before = registry.list_provider_models(p.id).await.unwrap();

        let second = registry.sync_provider_models(&p, &discovered).await.unwrap();
        assert_eq!(second.mutations(), 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(registry.list_provider_models(p.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn missing_models_are_deactivated_not_deleted() {
        let (registry, _) = registry();
        let p = registry
            .register_provider(new_provider("p", None, None))
            .await
            .unwrap();
        registry
            .sync_provider_models(&p, &[DiscoveredModel::new("a"), DiscoveredModel::new("b")])
            .await
            .unwrap();
        let result = registry
            .sync_provider_models(&p, &[DiscoveredModel::new("a")])
            .await
            .unwrap();
        assert_eq!(result.deactivated, 1);

        let models = registry.list_provider_models(p.id).await.unwrap();
        assert_eq!(models.len(), 2);
        let b = models.iter().find(|m| m.model_key == "b").unwrap();
        assert!(!b.active);

        let result = registry
            .sync_provider_models(&p, &[DiscoveredModel::new("a"), DiscoveredModel::new("b")])
            .await
            .unwrap();
        assert_eq!(result.reactivated, 1);
        assert_eq!(registry.list_provider_models(p.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sync_refreshes_reported_flags_only() {
        let (registry, _) = registry();
        let p = registry
            .register_provider(new_provider("p", None, None))
            .await
            .unwrap();
        let mut reasoning = DiscoveredModel::new("o3");
        reasoning.supports_reasoning = Some(true);
        registry.sync_provider_models(&p, &[reasoning]).await.unwrap();

        // A listing that does not report flags leaves them alone.
        let result = registry
            .sync_provider_models(&p, &[DiscoveredModel::new("o3")])
            .await
            .unwrap();
        assert_eq!(result.unchanged, 1);
        let models = registry.list_provider_models(p.id).await.unwrap();
        assert!(models[0].supports_reasoning);
    }

    #[tokio::test]
    async fn duplicate_discovered_keys_collapse() {
        let (registry, _) = registry();
        let p = registry
            .register_provider(new_provider("p", None, None))
            .await
            .unwrap();
        let result = registry
            .sync_provider_models(
                &p,
                &[
                    DiscoveredModel::new("a"),
                    DiscoveredModel::new("a"),
                    DiscoveredModel::new(" "),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.created, 1);
        let p = registry.get_provider(p.public_id).await.unwrap();
        assert!(p.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn registration_validates_input() {
        let (registry, _) = registry();
        let err = registry
            .register_provider(new_provider("p", None, Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = registry
            .register_provider(new_provider("Bad Slug", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut no_url = new_provider("custom", None, None);
        no_url.kind = ProviderKind::OpenaiCompatible;
        let err = registry.register_provider(no_url).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        registry
            .register_provider(new_provider("dup", Some(3), None))
            .await
            .unwrap();
        let err = registry
            .register_provider(new_provider("dup", Some(3), None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn credential_is_encrypted_with_hint() {
        let (registry, _) = registry();
        let p = registry
            .register_provider(new_provider("secret", None, None))
            .await
            .unwrap();
        assert!(!p.encrypted_api_key.contains("sk-secret"));
        assert_eq!(p.api_key_hint.as_deref(), Some("...6789"));
        assert_eq!(
            Vault::new("test-secret").decrypt(&p.encrypted_api_key).unwrap(),
            "sk-secret-0123456789"
        );

        let err = registry.rotate_credential(p.public_id, "").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut local = new_provider("local", None, None);
        local.kind = ProviderKind::Ollama;
        let local = registry.register_provider(local).await.unwrap();
        let rotated = registry.rotate_credential(local.public_id, "").await.unwrap();
        assert!(rotated.encrypted_api_key.is_empty());
        assert!(rotated.api_key_hint.is_none());
    }

    #[tokio::test]
    async fn hosted_kinds_need_an_api_key() {
        let (registry, _) = registry();
        for key in [None, Some(""), Some("none")] {
            let mut input = new_provider("hosted", None, None);
            input.api_key = key.map(str::to_string);
            let err = registry.register_provider(input).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "key {key:?}");
        }
    }

    #[tokio::test]
    async fn registration_without_vault_secret_fails() {
        let store = Arc::new(MemoryStore::new());
        let registry = ProviderRegistry::new(
            store.clone(),
            store,
            Vault::unconfigured(),
            &CacheConfig::default(),
        );
        let err = registry
            .register_provider(new_provider("p", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let mut keyless = new_provider("local", None, None);
        keyless.api_key = None;
        keyless.kind = ProviderKind::Ollama;
        assert!(registry.register_provider(keyless).await.is_ok());
    }

    #[tokio::test]
    async fn accessible_providers_union_and_cache_invalidation() {
        let (registry, _) = registry();
        registry
            .register_provider(new_provider("g", None, None))
            .await
            .unwrap();
        registry
            .register_provider(new_provider("o7", Some(7), None))
            .await
            .unwrap();
        registry
            .register_provider(new_provider("o8", Some(8), None))
            .await
            .unwrap();
        registry
            .register_provider(new_provider("p42", Some(7), Some(42)))
            .await
            .unwrap();

        let mut slugs: Vec<_> = registry
            .list_accessible_providers(7, &[42])
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.slug)
            .collect();
        slugs.sort();
        assert_eq!(slugs, ["g", "o7", "p42"]);

        // Cached set is invalidated by a write in the same org.
        registry
            .register_provider(new_provider("o7b", Some(7), None))
            .await
            .unwrap();
        let count = registry.list_accessible_providers(7, &[42]).await.unwrap().len();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn accessible_models_pick_winning_provider() {
        let (registry, _) = registry();
        with_model(&registry, new_provider("g", None, None), "shared").await;
        let p = with_model(&registry, new_provider("p", Some(7), Some(42)), "shared").await;
        with_model(&registry, new_provider("g2", None, None), "only-global").await;

        let scope = CallerScope::new(7, Some(42), vec![]);
        let models = registry.list_accessible_models(&scope).await.unwrap();
        let keys: Vec<_> = models.iter().map(|m| m.model.model_key.as_str()).collect();
        assert_eq!(keys, ["only-global", "shared"]);
        assert_eq!(models[1].provider.id, p.id);
        assert_eq!(models[1].tier, ScopeTier::Project);
    }

    /// Delegates to a `MemoryStore`, stalling the reads a sync performs so
    /// other writes can land in the middle of it.
    struct StallingStore {
        inner: Arc<MemoryStore>,
        stall: Duration,
    }

    #[async_trait::async_trait]
    impl ProviderStore for StallingStore {
        async fn insert_provider(&self, draft: ProviderDraft) -> Result<Provider> {
            self.inner.insert_provider(draft).await
        }
        async fn mark_provider_synced(&self, id: i64, at: DateTime<Utc>) -> Result<Provider> {
            self.inner.mark_provider_synced(id, at).await
        }
        async fn set_provider_active(&self, id: i64, active: bool) -> Result<Provider> {
            self.inner.set_provider_active(id, active).await
        }
        async fn set_provider_credential(
            &self,
            id: i64,
            encrypted_api_key: String,
            api_key_hint: Option<String>,
        ) -> Result<Provider> {
            self.inner
                .set_provider_credential(id, encrypted_api_key, api_key_hint)
                .await
        }
        async fn provider_by_id(&self, id: i64) -> Result<Option<Provider>> {
            let found = self.inner.provider_by_id(id).await;
            tokio::time::sleep(self.stall).await;
            found
        }
        async fn provider_by_public_id(&self, public_id: Uuid) -> Result<Option<Provider>> {
            self.inner.provider_by_public_id(public_id).await
        }
        async fn provider_by_slug(
            &self,
            organization_id: Option<i64>,
            slug: &str,
        ) -> Result<Option<Provider>> {
            self.inner.provider_by_slug(organization_id, slug).await
        }
        async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>> {
            self.inner.list_providers(filter).await
        }
        async fn count_providers(&self, filter: &ProviderFilter) -> Result<usize> {
            self.inner.count_providers(filter).await
        }
        async fn provider_models(&self, provider_id: i64) -> Result<Vec<ProviderModel>> {
            let found = self.inner.provider_models(provider_id).await;
            tokio::time::sleep(self.stall).await;
            found
        }
        async fn active_models_by_key(&self, model_key: &str) -> Result<Vec<ProviderModel>> {
            self.inner.active_models_by_key(model_key).await
        }
        async fn insert_provider_model(&self, draft: ProviderModelDraft) -> Result<ProviderModel> {
            self.inner.insert_provider_model(draft).await
        }
        async fn update_provider_model(&self, model: ProviderModel) -> Result<ProviderModel> {
            self.inner.update_provider_model(model).await
        }
    }

    #[tokio::test]
    async fn sync_does_not_undo_concurrent_deactivation_or_rotation() {
        let inner = Arc::new(MemoryStore::new());
        let registry = Arc::new(ProviderRegistry::new(
            Arc::new(StallingStore {
                inner: inner.clone(),
                stall: Duration::from_millis(50),
            }),
            inner.clone(),
            Vault::new("test-secret"),
            &CacheConfig::default(),
        ));
        let mut input = new_provider("racy", Some(7), None);
        input.api_key = Some("sk-old-000000000".into());
        let p = registry.register_provider(input).await.unwrap();

        let sync = {
            let registry = registry.clone();
            let p = p.clone();
            tokio::spawn(async move {
                registry
                    .sync_provider_models(&p, &[DiscoveredModel::new("m")])
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.set_provider_active(p.public_id, false).await.unwrap();
        registry
            .rotate_credential(p.public_id, "sk-new-111111111")
            .await
            .unwrap();
        sync.await.unwrap().unwrap();

        let after = registry.get_provider(p.public_id).await.unwrap();
        assert!(!after.active);
        assert!(after.last_synced_at.is_some());
        assert_eq!(after.api_key_hint.as_deref(), Some("...1111"));
        assert_eq!(
            Vault::new("test-secret").decrypt(&after.encrypted_api_key).unwrap(),
            "sk-new-111111111"
        );
        assert!(registry.get_provider_for_model("m", 7, None).await.is_err());
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vendor kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Backend family of an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    AzureOpenai,
    Anthropic,
    Google,
    Mistral,
    Groq,
    Together,
    Openrouter,
    Ollama,
    Vllm,
    OpenaiCompatible,
}

/// Whether a provider kind can be called without an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPolicy {
    /// Hosted APIs: every call carries `Authorization: Bearer <key>`.
    Required,
    /// Local runtimes and self-hosted endpoints.
    Optional,
}

/// Static description of a provider kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KindDescriptor {
    pub kind: ProviderKind,
    pub display_name: &'static str,
    pub default_base_url: Option<&'static str>,
    pub credential: CredentialPolicy,
}

impl KindDescriptor {
    pub fn requires_credential(&self) -> bool {
        self.credential == CredentialPolicy::Required
    }
}

const KIND_DESCRIPTORS: &[KindDescriptor] = &[
    KindDescriptor {
        kind: ProviderKind::Openai,
        display_name: "OpenAI",
        default_base_url: Some("https://api.openai.com/v1"),
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::AzureOpenai,
        display_name: "Azure OpenAI",
        default_base_url: None,
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::Anthropic,
        display_name: "Anthropic",
        default_base_url: Some("https://api.anthropic.com/v1"),
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::Google,
        display_name: "Google Gemini",
        default_base_url: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::Mistral,
        display_name: "Mistral",
        default_base_url: Some("https://api.mistral.ai/v1"),
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::Groq,
        display_name: "Groq",
        default_base_url: Some("https://api.groq.com/openai/v1"),
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::Together,
        display_name: "Together AI",
        default_base_url: Some("https://api.together.xyz/v1"),
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::Openrouter,
        display_name: "OpenRouter",
        default_base_url: Some("https://openrouter.ai/api/v1"),
        credential: CredentialPolicy::Required,
    },
    KindDescriptor {
        kind: ProviderKind::Ollama,
        display_name: "Ollama",
        default_base_url: Some("http://localhost:11434/v1"),
        credential: CredentialPolicy::Optional,
    },
    KindDescriptor {
        kind: ProviderKind::Vllm,
        display_name: "vLLM",
        default_base_url: Some("http://localhost:8000/v1"),
        credential: CredentialPolicy::Optional,
    },
    KindDescriptor {
        kind: ProviderKind::OpenaiCompatible,
        display_name: "OpenAI-compatible",
        default_base_url: None,
        credential: CredentialPolicy::Optional,
    },
];

impl ProviderKind {
    /// Look up the static descriptor for this kind.
    pub fn descriptor(&self) -> &'static KindDescriptor {
        KIND_DESCRIPTORS
            .iter()
            .find(|d| d.kind == *self)
            .unwrap_or(&KIND_DESCRIPTORS[KIND_DESCRIPTORS.len() - 1])
    }

    pub fn all() -> impl Iterator<Item = &'static KindDescriptor> {
        KIND_DESCRIPTORS.iter()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Visibility tier of a provider. Ordered lowest to highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTier {
    Global,
    Organization,
    Project,
}

/// The authenticated caller's tenancy, as supplied by the scope resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerScope {
    pub organization_id: i64,
    /// The project the request is made on behalf of, if any.
    pub project_id: Option<i64>,
    /// Every project the caller may see. Always contains `project_id`.
    pub accessible_project_ids: Vec<i64>,
}

impl CallerScope {
    pub fn new(organization_id: i64, project_id: Option<i64>, mut projects: Vec<i64>) -> Self {
        if let Some(pid) = project_id {
            projects.push(pid);
        }
        projects.sort_unstable();
        projects.dedup();
        Self {
            organization_id,
            project_id,
            accessible_project_ids: projects,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A configured upstream AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub public_id: Uuid,
    pub slug: String,
    pub name: String,
    pub organization_id: Option<i64>,
    pub project_id: Option<i64>,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Vault ciphertext. Empty when the provider needs no credential.
    #[serde(default)]
    pub encrypted_api_key: String,
    #[serde(default)]
    pub api_key_hint: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub is_moderated: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    pub fn tier(&self) -> ScopeTier {
        match (self.organization_id, self.project_id) {
            (_, Some(_)) => ScopeTier::Project,
            (Some(_), None) => ScopeTier::Organization,
            (None, None) => ScopeTier::Global,
        }
    }

    /// Whether this provider is visible to a caller in `org_id` with access
    /// to `project_ids`.
    pub fn visible_to(&self, org_id: i64, project_ids: &[i64]) -> bool {
        match (self.organization_id, self.project_id) {
            (None, None) => true,
            (Some(org), None) => org == org_id,
            (_, Some(project)) => project_ids.contains(&project),
        }
    }
}

/// Registration input for a new provider.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProvider {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub organization_id: Option<i64>,
    #[serde(default)]
    pub project_id: Option<i64>,
    pub kind: ProviderKind,
    /// Falls back to the kind's default base URL when omitted.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Plaintext key. Encrypted before it is persisted.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub is_moderated: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Pre-persistence provider row. The store assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct ProviderDraft {
    pub public_id: Uuid,
    pub slug: String,
    pub name: String,
    pub organization_id: Option<i64>,
    pub project_id: Option<i64>,
    pub kind: ProviderKind,
    pub base_url: String,
    pub encrypted_api_key: String,
    pub api_key_hint: Option<String>,
    pub is_moderated: bool,
    pub metadata: BTreeMap<String, String>,
}

/// Filter for listing providers. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ProviderFilter {
    pub active: Option<bool>,
    /// `Some(None)` selects global providers only.
    pub organization_id: Option<Option<i64>>,
    pub kind: Option<ProviderKind>,
}

impl ProviderFilter {
    pub fn matches(&self, provider: &Provider) -> bool {
        self.active.map_or(true, |a| provider.active == a)
            && self
                .organization_id
                .map_or(true, |org| provider.organization_id == org)
            && self.kind.map_or(true, |k| provider.kind == k)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderModel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One model advertised by one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModel {
    pub id: i64,
    pub provider_id: i64,
    #[serde(default)]
    pub model_catalog_id: Option<i64>,
    pub model_key: String,
    #[serde(default)]
    pub supports_images: bool,
    #[serde(default)]
    pub supports_embeddings: bool,
    #[serde(default)]
    pub supports_reasoning: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pre-persistence ProviderModel row.
#[derive(Debug, Clone)]
pub struct ProviderModelDraft {
    pub provider_id: i64,
    pub model_catalog_id: Option<i64>,
    pub model_key: String,
    pub supports_images: bool,
    pub supports_embeddings: bool,
    pub supports_reasoning: bool,
    pub active: bool,
}

/// A model reported by a provider's listing endpoint.
///
/// Capability flags are `None` when the listing did not say; sync then
/// leaves the stored flag untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub model_key: String,
    #[serde(default)]
    pub supports_images: Option<bool>,
    #[serde(default)]
    pub supports_embeddings: Option<bool>,
    #[serde(default)]
    pub supports_reasoning: Option<bool>,
}

impl DiscoveredModel {
    pub fn new(model_key: impl Into<String>) -> Self {
        Self {
            model_key: model_key.into(),
            ..Default::default()
        }
    }
}

/// Mutation counts from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub created: usize,
    pub reactivated: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub unchanged: usize,
}

impl SyncResult {
    /// Number of ProviderModel rows written by the pass.
    pub fn mutations(&self) -> usize {
        self.created + self.reactivated + self.updated + self.deactivated
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelCatalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Canonical, vendor-independent model definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub id: i64,
    pub public_id: Uuid,
    pub model_key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: CatalogStatus,
    #[serde(default)]
    pub is_moderated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pre-persistence catalog row.
#[derive(Debug, Clone)]
pub struct CatalogDraft {
    pub public_id: Uuid,
    pub model_key: String,
    pub display_name: String,
    pub description: Option<String>,
    pub status: CatalogStatus,
    pub is_moderated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCatalogEntry {
    pub model_key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: CatalogStatus,
    #[serde(default)]
    pub is_moderated: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<CatalogStatus>,
    #[serde(default)]
    pub is_moderated: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogFilter {
    #[serde(default)]
    pub status: Option<CatalogStatus>,
    #[serde(default)]
    pub is_moderated: Option<bool>,
    /// Case-insensitive substring of the key or display name.
    #[serde(default)]
    pub search: Option<String>,
}

impl CatalogFilter {
    pub fn matches(&self, entry: &ModelCatalog) -> bool {
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(moderated) = self.is_moderated {
            if entry.is_moderated != moderated {
                return false;
            }
        }
        if let Some(ref needle) = self.search {
            let needle = needle.to_lowercase();
            if !entry.model_key.to_lowercase().contains(&needle)
                && !entry.display_name.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

pub const MAX_PAGE_LIMIT: usize = 200;

impl Page {
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
            offset: self.offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: d_limit(),
            offset: 0,
        }
    }
}

fn d_limit() -> usize {
    50
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(org: Option<i64>, project: Option<i64>) -> Provider {
        let now = Utc::now();
        Provider {
            id: 1,
            public_id: Uuid::new_v4(),
            slug: "p".into(),
            name: "P".into(),
            organization_id: org,
            project_id: project,
            kind: ProviderKind::Openai,
            base_url: "http://localhost".into(),
            encrypted_api_key: String::new(),
            api_key_hint: None,
            active: true,
            is_moderated: false,
            metadata: BTreeMap::new(),
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn tier_follows_scope_columns() {
        assert_eq!(provider(None, None).tier(), ScopeTier::Global);
        assert_eq!(provider(Some(7), None).tier(), ScopeTier::Organization);
        assert_eq!(provider(Some(7), Some(42)).tier(), ScopeTier::Project);
        assert!(ScopeTier::Project > ScopeTier::Organization);
        assert!(ScopeTier::Organization > ScopeTier::Global);
    }

    #[test]
    fn visibility_rules() {
        assert!(provider(None, None).visible_to(7, &[]));
        assert!(provider(Some(7), None).visible_to(7, &[]));
        assert!(!provider(Some(8), None).visible_to(7, &[]));
        assert!(provider(Some(7), Some(42)).visible_to(7, &[42]));
        assert!(!provider(Some(7), Some(42)).visible_to(7, &[41]));
    }

    #[test]
    fn provider_filter_global_only() {
        let filter = ProviderFilter {
            organization_id: Some(None),
            ..Default::default()
        };
        assert!(filter.matches(&provider(None, None)));
        assert!(!filter.matches(&provider(Some(7), None)));
        assert!(ProviderFilter::default().matches(&provider(Some(7), Some(1))));
    }

    #[test]
    fn caller_scope_includes_requested_project() {
        let scope = CallerScope::new(7, Some(42), vec![3, 3, 9]);
        assert_eq!(scope.accessible_project_ids, vec![3, 9, 42]);
    }

    #[test]
    fn every_kind_has_a_descriptor() {
        for kind in [
            ProviderKind::Openai,
            ProviderKind::AzureOpenai,
            ProviderKind::Anthropic,
            ProviderKind::Google,
            ProviderKind::Mistral,
            ProviderKind::Groq,
            ProviderKind::Together,
            ProviderKind::Openrouter,
            ProviderKind::Ollama,
            ProviderKind::Vllm,
            ProviderKind::OpenaiCompatible,
        ] {
            assert_eq!(kind.descriptor().kind, kind);
        }
        assert_eq!(ProviderKind::all().count(), 11);
    }

    #[test]
    fn hosted_kinds_require_a_credential() {
        assert!(ProviderKind::Openai.descriptor().requires_credential());
        assert!(ProviderKind::AzureOpenai.descriptor().requires_credential());
        assert!(!ProviderKind::Ollama.descriptor().requires_credential());
        assert!(!ProviderKind::OpenaiCompatible.descriptor().requires_credential());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ProviderKind::AzureOpenai).unwrap();
        assert_eq!(json, r#""azure_openai""#);
    }

    #[test]
    fn page_is_clamped() {
        let page = Page {
            limit: 10_000,
            offset: 5,
        }
        .clamped();
        assert_eq!(page.limit, MAX_PAGE_LIMIT);
        assert_eq!(Page { limit: 0, offset: 0 }.clamped().limit, 1);
    }

    #[test]
    fn catalog_filter_search_is_case_insensitive() {
        let now = Utc::now();
        let entry = ModelCatalog {
            id: 1,
            public_id: Uuid::new_v4(),
            model_key: "gpt-4o-mini".into(),
            display_name: "GPT-4o mini".into(),
            description: None,
            status: CatalogStatus::Approved,
            is_moderated: false,
            created_at: now,
            updated_at: now,
        };
        let filter = CatalogFilter {
            search: Some("4O".into()),
            ..Default::default()
        };
        assert!(filter.matches(&entry));
        let filter = CatalogFilter {
            status: Some(CatalogStatus::Pending),
            ..Default::default()
        };
        assert!(!filter.matches(&entry));
    }
}

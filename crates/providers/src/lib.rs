pub mod cache;
pub mod catalog;
pub mod client;
pub mod lock;
pub mod refresh;
pub mod registry;
pub mod router;
pub mod sse;
pub mod store;
pub mod vault;
pub(crate) mod util;

// Re-exports for convenience.
pub use catalog::{CatalogPage, ModelCatalogService};
pub use client::{ChatCompletionClient, ChatModelClient, ClientFactory, ProviderClient};
pub use lock::{FileLockManager, LockLease, LockManager, MemoryLockManager};
pub use refresh::{CatalogRefresher, RefreshReport};
pub use registry::{ProviderRegistry, ResolvedModel};
pub use router::{CompletionOutcome, CompletionRequest, CompletionRouter, RelayStream};
pub use store::{CatalogStore, MemoryStore, ProviderStore};
pub use util::{api_key_hint, is_absent_credential};
pub use vault::Vault;

//! Periodic whole-fleet catalog refresh.
//!
//! Each cycle takes a named lease; if another worker holds it the cycle is
//! skipped. One provider failing to list its models never stops the cycle.

use std::sync::Arc;
use std::time::Duration;

use mg_domain::config::SyncConfig;
use mg_domain::error::Result;
use mg_domain::provider::{ProviderFilter, SyncResult};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::ClientFactory;
use crate::lock::LockManager;
use crate::registry::ProviderRegistry;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub providers: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub totals: SyncResult,
}

impl RefreshReport {
    fn absorb(&mut self, result: SyncResult) {
        self.succeeded += 1;
        self.totals.created += result.created;
        self.totals.reactivated += result.reactivated;
        self.totals.updated += result.updated;
        self.totals.deactivated += result.deactivated;
        self.totals.unchanged += result.unchanged;
    }
}

pub struct CatalogRefresher {
    registry: Arc<ProviderRegistry>,
    clients: Arc<ClientFactory>,
    locks: Arc<dyn LockManager>,
    config: SyncConfig,
}

impl CatalogRefresher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        clients: Arc<ClientFactory>,
        locks: Arc<dyn LockManager>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            clients,
            locks,
            config,
        }
    }

    /// Run one refresh cycle. `Ok(None)` means the cycle was skipped because
    /// the lease was unavailable.
    pub async fn run_cycle(&self) -> Result<Option<RefreshReport>> {
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let lease = match self.locks.try_acquire(&self.config.lock_name, ttl).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::debug!(lock = %self.config.lock_name, "refresh owned by another worker, skipping");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(lock = %self.config.lock_name, error = %e, "could not take refresh lock, skipping");
                return Ok(None);
            }
        };

        let report = self.refresh_all().await;

        if let Err(e) = self.locks.release(&lease).await {
            tracing::warn!(lock = %lease.name, error = %e, "failed to release refresh lock");
        }

        let report = report?;
        tracing::info!(
            providers = report.providers,
            succeeded = report.succeeded,
            failed = report.failed,
            created = report.totals.created,
            deactivated = report.totals.deactivated,
            "catalog refresh cycle complete"
        );
        Ok(Some(report))
    }

    async fn refresh_all(&self) -> Result<RefreshReport> {
        let providers = self
            .registry
            .store()
            .list_providers(&ProviderFilter {
                active: Some(true),
                ..Default::default()
            })
            .await?;

        let mut report = RefreshReport::default();
        for provider in &providers {
            report.providers += 1;
            match self.registry.refresh_provider(&self.clients, provider).await {
                Ok(result) => report.absorb(result),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        provider = %provider.slug,
                        code = e.code(),
                        error = %e,
                        "provider model refresh failed"
                    );
                }
            }
        }
        Ok(report)
    }

    /// Run cycles every `interval_secs` until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("catalog refresher stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::warn!(error = %e, "catalog refresh cycle failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockLease, MemoryLockManager};
    use crate::store::MemoryStore;
    use crate::vault::Vault;
    use mg_domain::config::{CacheConfig, UpstreamConfig};
    use mg_domain::provider::{NewProvider, ProviderKind};
    use std::collections::BTreeMap;

    fn refresher(locks: Arc<dyn LockManager>) -> (CatalogRefresher, Arc<ProviderRegistry>) {
        let store = Arc::new(MemoryStore::new());
        let vault = Vault::new("s");
        let registry = Arc::new(ProviderRegistry::new(
            store.clone(),
            store,
            vault.clone(),
            &CacheConfig::default(),
        ));
        let clients = Arc::new(ClientFactory::new(vault, &UpstreamConfig::default()).unwrap());
        (
            CatalogRefresher::new(registry.clone(), clients, locks, SyncConfig::default()),
            registry,
        )
    }

    #[tokio::test]
    async fn skips_when_lease_is_held() {
        let locks = Arc::new(MemoryLockManager::new());
        let (refresher, _) = refresher(locks.clone());
        let held = locks
            .try_acquire(&SyncConfig::default().lock_name, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert!(refresher.run_cycle().await.unwrap().is_none());
        locks.release(&held).await.unwrap();
        assert!(refresher.run_cycle().await.unwrap().is_some());
    }

    struct BrokenLocks;

    #[async_trait::async_trait]
    impl LockManager for BrokenLocks {
        async fn try_acquire(&self, _: &str, _: Duration) -> Result<Option<LockLease>> {
            Err(mg_domain::error::Error::Other("lock backend down".into()))
        }
        async fn release(&self, _: &LockLease) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lock_failure_is_not_fatal() {
        let (refresher, _) = refresher(Arc::new(BrokenLocks));
        assert!(refresher.run_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_provider_is_counted_not_fatal() {
        let (refresher, registry) = refresher(Arc::new(MemoryLockManager::new()));
        registry
            .register_provider(NewProvider {
                slug: "down".into(),
                name: "Down".into(),
                organization_id: None,
                project_id: None,
                kind: ProviderKind::OpenaiCompatible,
                base_url: Some("http://127.0.0.1:9/v1".into()),
                api_key: None,
                is_moderated: false,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap();
        let report = refresher.run_cycle().await.unwrap().unwrap();
        assert_eq!(report.providers, 1);
        assert_eq!(report.failed, 1);
    }
}

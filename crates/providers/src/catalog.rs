//! Model catalog service: CRUD over canonical model definitions.

use std::sync::Arc;

use mg_domain::error::{Error, Result};
use mg_domain::provider::{
    CatalogDraft, CatalogFilter, CatalogUpdate, ModelCatalog, NewCatalogEntry, Page,
};
use serde::Serialize;
use uuid::Uuid;

use crate::store::CatalogStore;

/// One page of catalog entries plus the filtered total.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogPage {
    pub items: Vec<ModelCatalog>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

pub struct ModelCatalogService {
    store: Arc<dyn CatalogStore>,
}

impl ModelCatalogService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, input: NewCatalogEntry) -> Result<ModelCatalog> {
        let model_key = input.model_key.trim();
        if model_key.is_empty() {
            return Err(Error::Validation("model_key must not be empty".into()));
        }
        let display_name = input
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(model_key)
            .to_string();

        let entry = self
            .store
            .insert_catalog(CatalogDraft {
                public_id: Uuid::new_v4(),
                model_key: model_key.to_string(),
                display_name,
                description: input.description,
                status: input.status,
                is_moderated: input.is_moderated,
            })
            .await?;
        tracing::info!(model = %entry.model_key, status = ?entry.status, "catalog entry created");
        Ok(entry)
    }

    pub async fn get(&self, public_id: Uuid) -> Result<ModelCatalog> {
        self.store
            .catalog_by_public_id(public_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("catalog entry {public_id}")))
    }

    pub async fn update(&self, public_id: Uuid, update: CatalogUpdate) -> Result<ModelCatalog> {
        let mut entry = self.get(public_id).await?;
        if let Some(name) = update.display_name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Validation("display_name must not be empty".into()));
            }
            entry.display_name = name.to_string();
        }
        if let Some(description) = update.description {
            entry.description = (!description.is_empty()).then_some(description);
        }
        if let Some(status) = update.status {
            entry.status = status;
        }
        if let Some(moderated) = update.is_moderated {
            entry.is_moderated = moderated;
        }
        let entry = self.store.update_catalog(entry).await?;
        tracing::info!(model = %entry.model_key, status = ?entry.status, "catalog entry updated");
        Ok(entry)
    }

    pub async fn list(&self, filter: &CatalogFilter, page: Page) -> Result<CatalogPage> {
        let page = page.clamped();
        let items = self.store.list_catalog(filter, page).await?;
        let total = self.store.count_catalog(filter).await?;
        Ok(CatalogPage {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    pub async fn count(&self, filter: &CatalogFilter) -> Result<usize> {
        self.store.count_catalog(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mg_domain::provider::CatalogStatus;

    fn entry(key: &str) -> NewCatalogEntry {
        NewCatalogEntry {
            model_key: key.into(),
            display_name: None,
            description: None,
            status: CatalogStatus::Pending,
            is_moderated: false,
        }
    }

    #[tokio::test]
    async fn create_defaults_display_name_and_rejects_duplicates() {
        let service = ModelCatalogService::new(Arc::new(MemoryStore::new()));
        let created = service.create(entry("gpt-4o")).await.unwrap();
        assert_eq!(created.display_name, "gpt-4o");
        assert_eq!(created.status, CatalogStatus::Pending);

        let err = service.create(entry("gpt-4o")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = service.create(entry("  ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn update_changes_only_supplied_fields() {
        let service = ModelCatalogService::new(Arc::new(MemoryStore::new()));
        let created = service.create(entry("o3")).await.unwrap();
        let updated = service
            .update(
                created.public_id,
                CatalogUpdate {
                    status: Some(CatalogStatus::Approved),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, CatalogStatus::Approved);
        assert_eq!(updated.display_name, "o3");
        assert!(!updated.is_moderated);

        let err = service
            .update(Uuid::new_v4(), CatalogUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_reports_total_and_clamped_page() {
        let service = ModelCatalogService::new(Arc::new(MemoryStore::new()));
        for i in 0..3 {
            service.create(entry(&format!("m{i}"))).await.unwrap();
        }
        let page = service
            .list(&CatalogFilter::default(), Page { limit: 0, offset: 0 })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.limit, 1);
        assert_eq!(page.items.len(), 1);
    }
}

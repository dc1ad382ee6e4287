use crate::api::middleware::AppError;
use crate::models::{Mapping, StoredMapping};
use crate::storage::{PutOutcome, SqliteStorage};
use std::sync::Arc;

/// Mapping catalog service: the only way mappings are created or removed
pub struct MappingCatalog {
    storage: Arc<SqliteStorage>,
}

impl MappingCatalog {
    pub fn new(storage: Arc<SqliteStorage>) -> Self {
        Self { storage }
    }

    /// Store a resolved mapping. Returns false when `if_not_exists` skipped it.
    pub async fn create_mapping(
        &self,
        mapping: &Mapping,
        replace: bool,
        if_not_exists: bool,
    ) -> Result<bool, AppError> {
        let outcome = self.storage.put_mapping(mapping, replace, if_not_exists).await?;
        match outcome {
            PutOutcome::Created => {
                tracing::info!("Created mapping {} ({})", mapping.name, mapping.connector_type);
                Ok(true)
            }
            PutOutcome::Replaced => {
                tracing::info!("Replaced mapping {} ({})", mapping.name, mapping.connector_type);
                Ok(true)
            }
            PutOutcome::Skipped => {
                tracing::debug!("Mapping {} exists, skipped", mapping.name);
                Ok(false)
            }
            PutOutcome::Exists => Err(AppError::AlreadyExists(format!(
                "Mapping already exists: {}",
                mapping.name
            ))),
        }
    }

    /// Remove a mapping. A missing name is an error unless `if_exists`.
    pub async fn remove_mapping(&self, name: &str, if_exists: bool) -> Result<(), AppError> {
        let removed = self.storage.delete_mapping(name).await?;
        if removed {
            tracing::info!("Dropped mapping {}", name);
        } else if !if_exists {
            return Err(AppError::NotFound(format!("Mapping does not exist: {}", name)));
        }
        Ok(())
    }

    pub async fn get_mapping(&self, name: &str) -> Result<Option<StoredMapping>, AppError> {
        Ok(self.storage.get_mapping(name).await?)
    }

    pub async fn list_mappings(&self) -> Result<Vec<StoredMapping>, AppError> {
        Ok(self.storage.list_mappings().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MappingField, MappingOptions, ScalarType};

    fn catalog(rt: &tokio::runtime::Runtime) -> MappingCatalog {
        let storage = rt.block_on(async { SqliteStorage::new(":memory:").await.unwrap() });
        MappingCatalog::new(Arc::new(storage))
    }

    fn mapping() -> Mapping {
        Mapping::new(
            "orders",
            "kafka",
            vec![MappingField::new("id", ScalarType::BigInt)],
            MappingOptions::new(),
        )
    }

    #[test]
    fn test_create_twice() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let catalog = catalog(&rt);

        assert!(rt.block_on(catalog.create_mapping(&mapping(), false, false)).unwrap());
        let err = rt
            .block_on(catalog.create_mapping(&mapping(), false, false))
            .unwrap_err();
        assert!(err.to_string().contains("Mapping already exists: orders"));

        assert!(!rt.block_on(catalog.create_mapping(&mapping(), false, true)).unwrap());
        assert_eq!(rt.block_on(catalog.list_mappings()).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_missing() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let catalog = catalog(&rt);

        rt.block_on(catalog.remove_mapping("nope", true)).unwrap();
        let err = rt.block_on(catalog.remove_mapping("nope", false)).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}

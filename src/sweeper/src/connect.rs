use async_trait::async_trait;
use common::{Configuration, TenantId};
use std::sync::Arc;

use crate::error::SweepError;
use crate::index::{ElasticsearchIndex, IndexBackend};
use crate::operations::BackendConnector;
use crate::storage::{ResilientStorage, ScyllaSession, StorageBackend};

/// Connects to the clusters named in the configuration.
pub struct LiveConnector {
    config: Configuration,
}

impl LiveConnector {
    pub fn new(config: Configuration) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendConnector for LiveConnector {
    async fn connect_index(&self) -> Result<Arc<dyn IndexBackend>, SweepError> {
        let base_url = self.config.index.base_url().ok_or_else(|| {
            SweepError::InvalidArgument("index contact point is required".to_string())
        })?;

        tracing::info!(
            url = %base_url,
            index = %self.config.index.index_name,
            "Connecting to index"
        );
        let index = ElasticsearchIndex::new(&base_url, &self.config.index)
            .map_err(SweepError::IndexConnect)?;
        Ok(Arc::new(index))
    }

    async fn connect_storage(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<dyn StorageBackend>, SweepError> {
        let endpoint = self.config.storage.endpoint().ok_or_else(|| {
            SweepError::InvalidArgument("storage contact point is required".to_string())
        })?;

        tracing::info!(endpoint = %endpoint, tenant = %tenant, "Connecting to storage");
        let session = ScyllaSession::connect(&endpoint, tenant, &self.config.storage)
            .await
            .map_err(SweepError::StorageConnect)?;

        Ok(Arc::new(ResilientStorage::new(
            session,
            &self.config.storage.resiliency,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_storage_endpoint_is_an_argument_error() {
        let connector = LiveConnector::new(Configuration::default());
        let tenant = TenantId::new("acme").unwrap();

        let error = match connector.connect_storage(&tenant).await {
            Err(e) => e,
            Ok(_) => panic!("connected without a contact point"),
        };
        assert!(matches!(error, SweepError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_index_client_builds_without_network() {
        let mut config = Configuration::default();
        config.index.contact_point = Some("localhost".to_string());
        let connector = LiveConnector::new(config);

        assert!(connector.connect_index().await.is_ok());
    }
}

use async_trait::async_trait;
use common::TenantId;
use std::sync::{Arc, Mutex};

use super::lock;
use super::{InMemoryIndex, RecordingSession, recording_storage};
use crate::error::SweepError;
use crate::index::IndexBackend;
use crate::operations::BackendConnector;
use crate::storage::StorageBackend;

/// Hands out the same in-memory backends on every connect and remembers which
/// tenants storage was opened for.
pub struct StaticConnector {
    index: Arc<InMemoryIndex>,
    session: Arc<RecordingSession>,
    storage_tenants: Mutex<Vec<TenantId>>,
    index_connects: Mutex<usize>,
}

impl StaticConnector {
    pub fn new(index: Arc<InMemoryIndex>, session: Arc<RecordingSession>) -> Self {
        Self {
            index,
            session,
            storage_tenants: Mutex::new(Vec::new()),
            index_connects: Mutex::new(0),
        }
    }

    pub fn index_connects(&self) -> usize {
        *lock(&self.index_connects)
    }

    pub fn storage_tenants(&self) -> Vec<TenantId> {
        lock(&self.storage_tenants).clone()
    }
}

#[async_trait]
impl BackendConnector for StaticConnector {
    async fn connect_index(&self) -> Result<Arc<dyn IndexBackend>, SweepError> {
        *lock(&self.index_connects) += 1;
        Ok(self.index.clone())
    }

    async fn connect_storage(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<dyn StorageBackend>, SweepError> {
        lock(&self.storage_tenants).push(tenant.clone());
        Ok(Arc::new(recording_storage(self.session.clone())))
    }
}

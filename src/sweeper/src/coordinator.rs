//! Deletion coordinator
//!
//! Drives a pattern deletion from index scan to storage deletes to index
//! cleanup, and the wholesale removal of a tenant.
//!
//! ## Ordering guarantees
//!
//! - Every storage delete of a scan page completes before the next page is
//!   requested.
//! - Index documents are removed only after every matched path is gone from
//!   storage, so an interrupted run can be repeated and will find the same
//!   paths again.
//! - Storage deletes are idempotent; repeating a run is always safe.

use common::config::{CoordinatorConfig, IndexConfig};
use common::{StorageNamespace, TenantId};
use futures::{Stream, StreamExt, pin_mut, stream};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::SweepError;
use crate::index::{DeletionBatch, IndexBackend, IndexError, IndexQuery, IndexScanner};
use crate::storage::StorageBackend;
use crate::wildcard::WildcardPattern;

/// Result of a pattern deletion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub tenant: TenantId,
    pub pattern: String,
    /// Paths deleted from every retention window.
    pub processed: u64,
    pub pages: u64,
    /// Documents the final delete-by-query removed from the index.
    pub index_documents_deleted: u64,
    pub duration_ms: u64,
}

/// Result of a tenant removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRemovalReport {
    pub tenant: TenantId,
    pub namespace: StorageNamespace,
    pub index_documents_deleted: u64,
    pub duration_ms: u64,
}

pub struct DeletionCoordinator {
    index: Arc<dyn IndexBackend>,
    scanner: IndexScanner,
    config: CoordinatorConfig,
}

impl DeletionCoordinator {
    pub fn new(
        index: Arc<dyn IndexBackend>,
        index_config: &IndexConfig,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            scanner: IndexScanner::new(index.clone(), index_config),
            index,
            config,
        }
    }

    /// Matched leaf paths, page by page, without deleting anything.
    pub fn preview<'a>(
        &'a self,
        tenant: &'a TenantId,
        pattern: &'a WildcardPattern,
    ) -> impl Stream<Item = Result<DeletionBatch, IndexError>> + Send + 'a {
        self.scanner.batches(tenant, pattern.regex())
    }

    /// Delete every leaf path of `tenant` matching `pattern` from storage,
    /// then drop the matching leaf documents from the index.
    ///
    /// On failure the error carries how many paths were fully deleted from
    /// storage; index documents are left untouched in that case.
    pub async fn delete_metrics(
        &self,
        storage: &dyn StorageBackend,
        tenant: &TenantId,
        pattern: &WildcardPattern,
    ) -> Result<DeletionReport, SweepError> {
        let started = Instant::now();
        self.ensure_exclusive_namespace(tenant).await?;

        info!(
            tenant = %tenant,
            pattern = %pattern,
            regex = %pattern.regex(),
            "Deleting metrics"
        );

        let mut processed = 0u64;
        let mut pages = 0u64;

        let batches = self.scanner.batches(tenant, pattern.regex());
        pin_mut!(batches);

        while let Some(batch) = batches.next().await {
            let batch = batch.map_err(|source| SweepError::Index { processed, source })?;
            pages += 1;
            processed = self.delete_batch(storage, &batch, processed).await?;
            info!(
                tenant = %tenant,
                page = batch.number,
                entries = batch.len(),
                processed,
                "Deleted scan page from storage"
            );
        }

        let query = IndexQuery::leaf_paths(tenant, pattern.regex());
        let index_documents_deleted = self
            .index
            .delete_by_query(&query)
            .await
            .map_err(|source| SweepError::Index { processed, source })?;

        if index_documents_deleted != processed {
            // paths indexed after the scan, or removed by a concurrent run
            warn!(
                tenant = %tenant,
                processed,
                index_documents_deleted,
                "Index cleanup count differs from storage deletes"
            );
        }

        let report = DeletionReport {
            tenant: tenant.clone(),
            pattern: pattern.to_string(),
            processed,
            pages,
            index_documents_deleted,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            tenant = %tenant,
            pattern = %pattern,
            processed,
            pages,
            index_documents_deleted,
            duration_ms = report.duration_ms,
            "Metric deletion completed"
        );

        Ok(report)
    }

    /// Remove every index document of `tenant`, then truncate both of its
    /// retention-window tables.
    pub async fn remove_tenant(
        &self,
        storage: &dyn StorageBackend,
        tenant: &TenantId,
    ) -> Result<TenantRemovalReport, SweepError> {
        let started = Instant::now();
        self.ensure_exclusive_namespace(tenant).await?;
        let namespace = tenant.namespace();

        info!(tenant = %tenant, namespace = %namespace, "Removing tenant");

        let index_documents_deleted = self
            .index
            .delete_by_query(&IndexQuery::tenant(tenant))
            .await
            .map_err(|source| SweepError::Index {
                processed: 0,
                source,
            })?;

        info!(
            tenant = %tenant,
            index_documents_deleted,
            "Removed tenant documents from index"
        );

        storage
            .truncate_tenant()
            .await
            .map_err(|source| SweepError::Storage {
                processed: 0,
                source,
            })?;

        let report = TenantRemovalReport {
            tenant: tenant.clone(),
            namespace,
            index_documents_deleted,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            tenant = %tenant,
            namespace = %report.namespace,
            duration_ms = report.duration_ms,
            "Tenant removal completed"
        );

        Ok(report)
    }

    /// Pipeline the page's storage deletes and wait for all of them.
    async fn delete_batch(
        &self,
        storage: &dyn StorageBackend,
        batch: &DeletionBatch,
        mut processed: u64,
    ) -> Result<u64, SweepError> {
        let mut deletes = stream::iter(&batch.paths)
            .map(|path| storage.delete_metric(path.as_str()))
            .buffer_unordered(self.config.max_in_flight_deletes.max(1));

        while let Some(result) = deletes.next().await {
            result.map_err(|source| SweepError::Storage { processed, source })?;
            processed += 1;
        }

        Ok(processed)
    }

    /// Refuse to touch storage shared with another tenant.
    async fn ensure_exclusive_namespace(&self, tenant: &TenantId) -> Result<(), SweepError> {
        if !self.config.reject_namespace_collisions {
            return Ok(());
        }

        let namespace = tenant.namespace();
        let tenants = self
            .index
            .list_tenants()
            .await
            .map_err(|source| SweepError::Index {
                processed: 0,
                source,
            })?;

        let colliding = tenants
            .into_iter()
            .filter(|other| other != tenant.as_str())
            .filter_map(|other| TenantId::new(other).ok())
            .find(|other| other.namespace() == namespace);

        match colliding {
            Some(other) => Err(SweepError::NamespaceCollision {
                tenant: tenant.to_string(),
                other: other.to_string(),
                namespace: namespace.to_string(),
            }),
            None => Ok(()),
        }
    }
}

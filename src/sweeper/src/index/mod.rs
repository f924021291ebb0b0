//! Search-index capability: paginated scans and delete-by-query.

pub mod elasticsearch;
pub mod scanner;

use async_trait::async_trait;
use common::TenantId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::wildcard::PathRegex;

pub use elasticsearch::ElasticsearchIndex;
pub use scanner::{DeletionBatch, IndexScanner};

/// Dotted metric path as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricPath(String);

impl MetricPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MetricPath {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MetricPath {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MetricPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque server-side handle for a paused scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScrollCursor(String);

impl ScrollCursor {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of scan results. An empty page means the scan is exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub cursor: Option<ScrollCursor>,
    pub paths: Vec<MetricPath>,
}

/// Document filters understood by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// Leaf documents of one tenant whose path matches the expression.
    LeafPaths { tenant: TenantId, regex: PathRegex },
    /// Every document of one tenant, leaf or not.
    Tenant { tenant: TenantId },
}

impl IndexQuery {
    pub fn leaf_paths(tenant: &TenantId, regex: &PathRegex) -> Self {
        IndexQuery::LeafPaths {
            tenant: tenant.clone(),
            regex: regex.clone(),
        }
    }

    pub fn tenant(tenant: &TenantId) -> Self {
        IndexQuery::Tenant {
            tenant: tenant.clone(),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        match self {
            IndexQuery::LeafPaths { tenant, .. } | IndexQuery::Tenant { tenant } => tenant,
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index request failed: {0}")]
    Transport(String),

    #[error("Index returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Scroll cursor expired before the scan finished")]
    CursorExpired,

    #[error("Failed to decode index response: {0}")]
    Decode(String),

    #[error("Delete-by-query reported {count} failures, first: {first}")]
    BulkDeleteFailed { count: usize, first: String },

    #[error("Delete-by-query timed out on the server after deleting {deleted} documents")]
    TimedOut { deleted: u64 },

    #[error("Tenant listing is incomplete: {omitted} documents fell outside the buckets")]
    TenantListTruncated { omitted: u64 },
}

/// Search index holding one document per metric path node.
///
/// Implementations perform no retries; every failure goes straight back to
/// the caller.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Start a scan and return its first page.
    async fn open_scan(
        &self,
        query: &IndexQuery,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScanPage, IndexError>;

    /// Fetch the page after `cursor`, extending its lifetime by `keep_alive`.
    async fn next_page(
        &self,
        cursor: &ScrollCursor,
        keep_alive: Duration,
    ) -> Result<ScanPage, IndexError>;

    /// Free the server-side state held by `cursor`.
    async fn release_scan(&self, cursor: &ScrollCursor) -> Result<(), IndexError>;

    /// Delete every document matching `query`, returning how many went.
    async fn delete_by_query(&self, query: &IndexQuery) -> Result<u64, IndexError>;

    /// Distinct tenant ids present in the index.
    async fn list_tenants(&self) -> Result<Vec<String>, IndexError>;
}

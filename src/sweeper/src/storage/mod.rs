//! Time-series storage capability: keyed deletes and table truncation over
//! the per-tenant retention-window tables.

pub mod cql;
pub mod resilient;

use async_trait::async_trait;
use common::RetentionWindow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use cql::ScyllaSession;
pub use resilient::{Backoff, ExponentialBackoff, FixedBackoff, ResilientStorage};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to connect to storage: {0}")]
    Connect(String),

    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Storage request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage request failed: {0}")]
    Fatal(String),

    #[error("Storage request queue is full ({max_queue_depth} requests waiting)")]
    Overloaded { max_queue_depth: usize },

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<StorageError>,
    },
}

impl StorageError {
    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_) | StorageError::Timeout(_))
    }
}

/// A single request against one retention-window table of the bound tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Delete {
        window: RetentionWindow,
        path: String,
    },
    Truncate {
        window: RetentionWindow,
    },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Delete { window, path } => write!(f, "delete {path} from {window} table"),
            Statement::Truncate { window } => write!(f, "truncate {window} table"),
        }
    }
}

/// Executes bound statements for one tenant. No throttling or retries.
#[async_trait]
pub trait StatementSession: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: StatementSession + ?Sized> StatementSession for Arc<T> {
    async fn execute(&self, statement: &Statement) -> Result<(), StorageError> {
        (**self).execute(statement).await
    }
}

/// Storage operations for the tenant the backend was built for.
///
/// Every operation applies to both retention windows.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Delete all rows of `path`. Deleting an absent path is a no-op.
    async fn delete_metric(&self, path: &str) -> Result<(), StorageError>;

    /// Remove every row of the tenant.
    async fn truncate_tenant(&self) -> Result<(), StorageError>;
}

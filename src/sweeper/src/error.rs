use common::tenant::TenantError;
use thiserror::Error;

use crate::index::IndexError;
use crate::storage::StorageError;
use crate::wildcard::PatternError;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid wildcard pattern")]
    Pattern(#[from] PatternError),

    #[error("Invalid tenant")]
    Tenant(#[from] TenantError),

    #[error("Failed to connect to storage")]
    StorageConnect(#[source] StorageError),

    #[error("Failed to connect to index")]
    IndexConnect(#[source] IndexError),

    #[error("Storage request failed after {processed} metrics were deleted")]
    Storage {
        processed: u64,
        #[source]
        source: StorageError,
    },

    #[error("Index request failed after {processed} metrics were deleted")]
    Index {
        processed: u64,
        #[source]
        source: IndexError,
    },

    #[error(
        "Tenants '{tenant}' and '{other}' share storage namespace '{namespace}'; refusing to delete"
    )]
    NamespaceCollision {
        tenant: String,
        other: String,
        namespace: String,
    },

    #[error("Failed to write output")]
    Output(#[from] std::io::Error),
}

impl SweepError {
    /// Metrics fully deleted from storage before the failure, if the error
    /// happened mid-run.
    pub fn processed(&self) -> Option<u64> {
        match self {
            SweepError::Storage { processed, .. } | SweepError::Index { processed, .. } => {
                Some(*processed)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_storage_failure_keeps_progress_and_cause() {
        let error = SweepError::Storage {
            processed: 42,
            source: StorageError::Fatal("unconfigured table".into()),
        };
        assert_eq!(error.processed(), Some(42));
        assert_eq!(
            error.to_string(),
            "Storage request failed after 42 metrics were deleted"
        );
        assert_eq!(
            error.source().map(|e| e.to_string()),
            Some("Storage request failed: unconfigured table".to_string())
        );
    }

    #[test]
    fn test_pattern_error_converts() {
        let error: SweepError = PatternError::Empty.into();
        assert!(matches!(error, SweepError::Pattern(PatternError::Empty)));
        assert_eq!(error.processed(), None);
    }
}

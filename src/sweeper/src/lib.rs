//! Deletion of metric data and index metadata, per tenant or per wildcard
//! pattern.
//!
//! The index holds one document per metric path node; storage holds the
//! time series of leaf paths in one table per tenant and retention window.
//! [`coordinator::DeletionCoordinator`] keeps the two consistent: storage
//! goes first, index metadata last.

pub mod connect;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod operations;
pub mod storage;
pub mod wildcard;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connect::LiveConnector;
pub use coordinator::{DeletionCoordinator, DeletionReport, TenantRemovalReport};
pub use error::SweepError;
pub use operations::{BackendConnector, ConfirmationPrompt, Operation, Outcome};
pub use wildcard::{PathRegex, PatternError, WildcardPattern, translate};

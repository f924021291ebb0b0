//! In-memory backends for exercising the sweeper without a cluster.
//!
//! Available during tests or with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! sweeper = { path = "src/sweeper", features = ["testing"] }
//! ```
//!
//! [`InMemoryIndex`] keeps documents and scroll cursors in memory and
//! records every call made against it. [`RecordingSession`] records the
//! statements [`crate::storage::ResilientStorage`] issues, so tests see the
//! real per-window fan-out.

mod connector;
mod index;
mod storage;

pub use connector::StaticConnector;
pub use index::{InMemoryIndex, IndexCall, IndexDocument};
pub use storage::{RecordingSession, recording_storage};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock that keeps working after a panicking test thread poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

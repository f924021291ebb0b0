use async_trait::async_trait;
use common::RetentionWindow;
use common::config::ResiliencyConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::lock;
use crate::storage::{FixedBackoff, ResilientStorage, Statement, StatementSession, StorageError};

/// Session that records every statement it accepts.
///
/// A delete for the configured failing path is rejected with a fatal error
/// and not recorded.
#[derive(Default)]
pub struct RecordingSession {
    statements: Mutex<Vec<Statement>>,
    failing_path: Option<String>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(path: impl Into<String>) -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            failing_path: Some(path.into()),
        }
    }

    pub fn statements(&self) -> Vec<Statement> {
        lock(&self.statements).clone()
    }

    /// Paths deleted from `window`'s table, in execution order.
    pub fn deleted_paths(&self, window: RetentionWindow) -> Vec<String> {
        lock(&self.statements)
            .iter()
            .filter_map(|statement| match statement {
                Statement::Delete { window: w, path } if *w == window => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tables truncated, in execution order.
    pub fn truncated(&self) -> Vec<RetentionWindow> {
        lock(&self.statements)
            .iter()
            .filter_map(|statement| match statement {
                Statement::Truncate { window } => Some(*window),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl StatementSession for RecordingSession {
    async fn execute(&self, statement: &Statement) -> Result<(), StorageError> {
        if let (Statement::Delete { path, .. }, Some(failing)) = (statement, &self.failing_path) {
            if path == failing {
                return Err(StorageError::Fatal(format!("rejected delete of {path}")));
            }
        }
        lock(&self.statements).push(statement.clone());
        Ok(())
    }
}

/// Wrap `session` the way live storage is wrapped, minus retry delays.
pub fn recording_storage(
    session: Arc<RecordingSession>,
) -> ResilientStorage<Arc<RecordingSession>> {
    ResilientStorage::new(session, &ResiliencyConfig::default())
        .with_backoff(FixedBackoff(Duration::ZERO))
}

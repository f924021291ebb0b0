//! CQL session bound to one tenant's retention-window tables.

use async_trait::async_trait;
use common::config::StorageConfig;
use common::{RetentionWindow, TenantId};
use scylla::prepared_statement::PreparedStatement;
use scylla::retry_policy::FallthroughRetryPolicy;
use scylla::statement::Consistency;
use scylla::transport::Compression;
use scylla::transport::errors::{DbError, QueryError};
use scylla::{ExecutionProfile, Session, SessionBuilder};

use super::{Statement, StatementSession, StorageError};

struct WindowStatements {
    delete: PreparedStatement,
    truncate: PreparedStatement,
}

/// Prepared delete and truncate statements for both windows of a tenant.
///
/// Table names are derived once, at connect time, from the tenant's storage
/// namespace. Driver-level retries are disabled; [`super::ResilientStorage`]
/// owns the retry policy.
pub struct ScyllaSession {
    session: Session,
    minute: WindowStatements,
    fifteen_minutes: WindowStatements,
}

impl ScyllaSession {
    pub async fn connect(
        endpoint: &str,
        tenant: &TenantId,
        config: &StorageConfig,
    ) -> Result<Self, StorageError> {
        // a lost delete acknowledgement is harmless, a re-run repeats it
        let profile = ExecutionProfile::builder()
            .consistency(Consistency::Any)
            .request_timeout(None)
            .retry_policy(Box::new(FallthroughRetryPolicy::new()))
            .build();

        let session = SessionBuilder::new()
            .known_node(endpoint)
            .compression(config.compression.then_some(Compression::Lz4))
            .default_execution_profile_handle(profile.into_handle())
            .build()
            .await
            .map_err(|e| StorageError::Connect(e.to_string()))?;

        let cluster = session.get_cluster_data();
        for node in cluster.get_nodes_info() {
            tracing::info!(
                datacenter = ?node.datacenter,
                rack = ?node.rack,
                "Connected to storage node"
            );
        }

        let namespace = tenant.namespace();
        let minute_table = namespace.table(&config.keyspace, RetentionWindow::Minute);
        let fifteen_table = namespace.table(&config.keyspace, RetentionWindow::FifteenMinutes);

        tracing::info!(table = %minute_table, "Will use minute table");
        tracing::info!(table = %fifteen_table, "Will use 15-minute table");

        let minute = prepare_window(&session, &minute_table).await?;
        let fifteen_minutes = prepare_window(&session, &fifteen_table).await?;

        Ok(Self {
            session,
            minute,
            fifteen_minutes,
        })
    }

    fn statements(&self, window: RetentionWindow) -> &WindowStatements {
        match window {
            RetentionWindow::Minute => &self.minute,
            RetentionWindow::FifteenMinutes => &self.fifteen_minutes,
        }
    }
}

async fn prepare_window(session: &Session, table: &str) -> Result<WindowStatements, StorageError> {
    let mut delete = session
        .prepare(format!("DELETE FROM {table} WHERE path = ?"))
        .await
        .map_err(|e| StorageError::Fatal(format!("Failed to prepare delete on {table}: {e}")))?;
    delete.set_is_idempotent(true);

    let mut truncate = session
        .prepare(format!("TRUNCATE TABLE {table}"))
        .await
        .map_err(|e| StorageError::Fatal(format!("Failed to prepare truncate on {table}: {e}")))?;
    truncate.set_is_idempotent(true);

    Ok(WindowStatements { delete, truncate })
}

/// Timeouts, broken connections and coordinator-side overload are worth
/// another attempt; everything else is not.
fn classify(error: QueryError) -> StorageError {
    let transient = matches!(
        error,
        QueryError::TimeoutError
            | QueryError::RequestTimeout(_)
            | QueryError::IoError(_)
            | QueryError::DbError(
                DbError::Overloaded
                    | DbError::IsBootstrapping
                    | DbError::Unavailable { .. }
                    | DbError::ReadTimeout { .. }
                    | DbError::WriteTimeout { .. },
                _
            )
    );

    if transient {
        StorageError::Transient(error.to_string())
    } else {
        StorageError::Fatal(error.to_string())
    }
}

#[async_trait]
impl StatementSession for ScyllaSession {
    async fn execute(&self, statement: &Statement) -> Result<(), StorageError> {
        let result = match statement {
            Statement::Delete { window, path } => {
                self.session
                    .execute(&self.statements(*window).delete, (path.as_str(),))
                    .await
            }
            Statement::Truncate { window } => {
                self.session
                    .execute(&self.statements(*window).truncate, ())
                    .await
            }
        };

        result.map(|_| ()).map_err(classify)
    }
}

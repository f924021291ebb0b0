//! Operator-facing operations and the confirmation gate in front of them.
//!
//! Nothing connects to a backend before the operator typed the exact
//! confirmation phrase. Dry runs skip the prompt and never open storage.

use async_trait::async_trait;
use common::{Configuration, TenantId};
use futures::{StreamExt, pin_mut};
use std::io::Write;
use std::sync::Arc;
use tracing::info;

use crate::coordinator::{DeletionCoordinator, DeletionReport, TenantRemovalReport};
use crate::error::SweepError;
use crate::index::IndexBackend;
use crate::storage::StorageBackend;
use crate::wildcard::WildcardPattern;

pub const DELETE_METRICS_CONFIRMATION: &str = "Yes, I am";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    RemoveTenant {
        tenant: TenantId,
    },
    DeleteMetrics {
        tenant: TenantId,
        pattern: WildcardPattern,
        dry_run: bool,
    },
}

/// Question shown to the operator and the only answer that proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub message: String,
    pub expected: String,
}

impl ConfirmationPrompt {
    /// Exact, case-sensitive match.
    pub fn accepts(&self, answer: &str) -> bool {
        answer == self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operator did not confirm; nothing was touched.
    Declined,
    Previewed { matched: u64 },
    MetricsDeleted(DeletionReport),
    TenantRemoved(TenantRemovalReport),
}

impl Operation {
    pub fn tenant(&self) -> &TenantId {
        match self {
            Operation::RemoveTenant { tenant } | Operation::DeleteMetrics { tenant, .. } => tenant,
        }
    }

    fn needs_storage(&self) -> bool {
        !matches!(self, Operation::DeleteMetrics { dry_run: true, .. })
    }

    /// Prompt to show before running, `None` for dry runs.
    pub fn confirmation(&self) -> Option<ConfirmationPrompt> {
        match self {
            Operation::RemoveTenant { tenant } => Some(ConfirmationPrompt {
                message: format!(
                    "Are you sure you want to remove tenant {tenant}? \
                     Type 'Yes, I am sure I want to remove {tenant}' to continue"
                ),
                expected: format!("Yes, I am sure I want to remove {tenant}"),
            }),
            Operation::DeleteMetrics { dry_run: true, .. } => None,
            Operation::DeleteMetrics {
                tenant, pattern, ..
            } => Some(ConfirmationPrompt {
                message: format!(
                    "Are you sure you want to delete metrics matching {pattern} for tenant {tenant}? \
                     Type '{DELETE_METRICS_CONFIRMATION}' to continue"
                ),
                expected: DELETE_METRICS_CONFIRMATION.to_string(),
            }),
        }
    }

    /// Endpoints the operation needs must be configured.
    pub fn check_endpoints(&self, config: &Configuration) -> Result<(), SweepError> {
        if config.index.contact_point.is_none() {
            return Err(SweepError::InvalidArgument(
                "index contact point is required".to_string(),
            ));
        }
        if self.needs_storage() && config.storage.contact_point.is_none() {
            return Err(SweepError::InvalidArgument(
                "storage contact point is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opens backend connections on demand.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect_index(&self) -> Result<Arc<dyn IndexBackend>, SweepError>;

    /// Storage bound to `tenant`'s retention-window tables.
    async fn connect_storage(
        &self,
        tenant: &TenantId,
    ) -> Result<Arc<dyn StorageBackend>, SweepError>;
}

/// Run `operation` once `confirm` accepted its prompt.
///
/// `confirm` is only called for operations that need confirmation. Dry-run
/// paths are written to `out`, one per line.
pub async fn run<W: Write>(
    operation: &Operation,
    config: &Configuration,
    connector: &dyn BackendConnector,
    confirm: impl FnOnce(&ConfirmationPrompt) -> bool,
    out: &mut W,
) -> Result<Outcome, SweepError> {
    operation.check_endpoints(config)?;

    if let Some(prompt) = operation.confirmation() {
        if !confirm(&prompt) {
            info!(tenant = %operation.tenant(), "Operation cancelled");
            return Ok(Outcome::Declined);
        }
    }

    let index = connector.connect_index().await?;
    let coordinator = DeletionCoordinator::new(index, &config.index, config.coordinator.clone());

    match operation {
        Operation::DeleteMetrics {
            tenant,
            pattern,
            dry_run: true,
        } => {
            let matched = preview(&coordinator, tenant, pattern, out).await?;
            Ok(Outcome::Previewed { matched })
        }
        Operation::DeleteMetrics {
            tenant, pattern, ..
        } => {
            let storage = connector.connect_storage(tenant).await?;
            let report = coordinator
                .delete_metrics(storage.as_ref(), tenant, pattern)
                .await?;
            info!("Deleted {} metrics", report.processed);
            Ok(Outcome::MetricsDeleted(report))
        }
        Operation::RemoveTenant { tenant } => {
            let storage = connector.connect_storage(tenant).await?;
            let report = coordinator.remove_tenant(storage.as_ref(), tenant).await?;
            Ok(Outcome::TenantRemoved(report))
        }
    }
}

async fn preview<W: Write>(
    coordinator: &DeletionCoordinator,
    tenant: &TenantId,
    pattern: &WildcardPattern,
    out: &mut W,
) -> Result<u64, SweepError> {
    info!(tenant = %tenant, pattern = %pattern, "Will delete the following metrics:");

    let mut matched = 0u64;
    let batches = coordinator.preview(tenant, pattern);
    pin_mut!(batches);

    while let Some(batch) = batches.next().await {
        let batch = batch.map_err(|source| SweepError::Index {
            processed: 0,
            source,
        })?;
        for path in &batch.paths {
            writeln!(out, "{path}")?;
            matched += 1;
        }
    }
    out.flush()?;

    info!("Found {matched} metrics");
    Ok(matched)
}

//! Tenant identity and the physical storage namespace derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Operator-supplied tenant identifier, exactly as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, TenantError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TenantError::Empty);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage namespace this tenant's tables live under.
    pub fn namespace(&self) -> StorageNamespace {
        StorageNamespace::for_tenant(self)
    }
}

impl std::str::FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized tenant name used in physical table identifiers.
///
/// Every character outside `[0-9a-zA-Z_]` becomes `_`. The mapping is not
/// injective: `acme-1` and `acme.1` share the namespace `acme_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageNamespace(String);

impl StorageNamespace {
    pub fn for_tenant(tenant: &TenantId) -> Self {
        let normalized = tenant
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully qualified table for one retention window.
    ///
    /// Format: `{keyspace}.metric_{namespace}_{window_seconds}`
    pub fn table(&self, keyspace: &str, window: RetentionWindow) -> String {
        format!("{keyspace}.metric_{}_{}", self.0, window.seconds())
    }
}

impl fmt::Display for StorageNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rollup granularity; each one is backed by its own table per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionWindow {
    /// Minute-level rollups.
    Minute,
    /// 15-minute rollups.
    FifteenMinutes,
}

impl RetentionWindow {
    pub const ALL: [RetentionWindow; 2] =
        [RetentionWindow::Minute, RetentionWindow::FifteenMinutes];

    pub fn seconds(&self) -> u32 {
        match self {
            RetentionWindow::Minute => 60,
            RetentionWindow::FifteenMinutes => 900,
        }
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.seconds())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TenantError {
    #[error("Tenant id cannot be empty")]
    Empty,
}

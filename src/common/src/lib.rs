pub mod cli;
pub mod config;
pub mod tenant;

pub use config::Configuration;
pub use tenant::{RetentionWindow, StorageNamespace, TenantId};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

pub const DEFAULT_CONFIG_FILE: &str = "metricsweep.toml";
pub const ENV_PREFIX: &str = "METRICSWEEP__";

/// Time-series storage (CQL) connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Contact point host. Usually supplied on the command line.
    ///
    /// Env: METRICSWEEP__STORAGE__CONTACT_POINT
    #[serde(default)]
    pub contact_point: Option<String>,
    pub port: u16,
    /// Keyspace holding the per-tenant rollup tables.
    pub keyspace: String,
    /// LZ4 protocol compression.
    pub compression: bool,
    pub resiliency: ResiliencyConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            contact_point: None,
            port: 9042,
            keyspace: "metric".to_string(),
            compression: true,
            resiliency: ResiliencyConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn endpoint(&self) -> Option<String> {
        self.contact_point
            .as_ref()
            .map(|host| format!("{host}:{}", self.port))
    }
}

/// Request throttling and retry policy for the storage adapter.
///
/// Large deletes are slow, not stuck: the defaults favour waiting over
/// failing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResiliencyConfig {
    /// Requests allowed in flight at once.
    ///
    /// Env: METRICSWEEP__STORAGE__RESILIENCY__MAX_CONCURRENT_REQUESTS
    pub max_concurrent_requests: usize,
    /// Requests allowed to wait for a slot before submissions fail with an
    /// overload error.
    ///
    /// Env: METRICSWEEP__STORAGE__RESILIENCY__MAX_QUEUE_DEPTH
    pub max_queue_depth: usize,
    /// Retries after the first attempt for transient failures.
    ///
    /// Env: METRICSWEEP__STORAGE__RESILIENCY__MAX_RETRIES
    pub max_retries: u32,
    /// Env: METRICSWEEP__STORAGE__RESILIENCY__REQUEST_TIMEOUT
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for ResiliencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 1024,
            max_queue_depth: 1024 * 1024,
            max_retries: 11,
            request_timeout: Duration::from_millis(1_000_000),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Search index (HTTP) connection and scan settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Env: METRICSWEEP__INDEX__CONTACT_POINT
    #[serde(default)]
    pub contact_point: Option<String>,
    pub port: u16,
    pub scheme: String,
    /// Index holding the path documents.
    pub index_name: String,
    /// Entries fetched per scroll page.
    pub page_size: usize,
    /// Server-side lifetime of a scroll cursor between pages.
    #[serde(with = "humantime_serde")]
    pub scroll_keep_alive: Duration,
    /// Client timeout per request. Delete-by-query over a large tenant runs
    /// for hours.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            contact_point: None,
            port: 9200,
            scheme: "http".to_string(),
            index_name: "metrics".to_string(),
            page_size: 10_000,
            scroll_keep_alive: Duration::from_secs(4 * 3600),
            request_timeout: Duration::from_secs(4 * 3600),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl IndexConfig {
    pub fn base_url(&self) -> Option<String> {
        self.contact_point
            .as_ref()
            .map(|host| format!("{}://{host}:{}", self.scheme, self.port))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Storage deletes pipelined per scan page.
    pub max_in_flight_deletes: usize,
    /// Refuse destructive runs when another known tenant normalizes to the
    /// same storage namespace.
    pub reject_namespace_collisions: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_in_flight_deletes: 64,
            reject_namespace_collisions: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub coordinator: CoordinatorConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file_exact(path))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let resiliency = &self.storage.resiliency;
        if resiliency.max_concurrent_requests == 0 {
            return Err(ConfigError::ZeroValue("storage.resiliency.max_concurrent_requests"));
        }
        if resiliency.request_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("storage.resiliency.request_timeout"));
        }
        if resiliency.backoff.multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier(
                resiliency.backoff.multiplier,
            ));
        }
        if self.index.page_size == 0 {
            return Err(ConfigError::ZeroValue("index.page_size"));
        }
        if self.index.scroll_keep_alive.is_zero() {
            return Err(ConfigError::ZeroValue("index.scroll_keep_alive"));
        }
        if self.index.request_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("index.request_timeout"));
        }
        if self.index.index_name.is_empty() {
            return Err(ConfigError::Empty("index.index_name"));
        }
        if self.storage.keyspace.is_empty() {
            return Err(ConfigError::Empty("storage.keyspace"));
        }
        if self.coordinator.max_in_flight_deletes == 0 {
            return Err(ConfigError::ZeroValue("coordinator.max_in_flight_deletes"));
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("Backoff multiplier must be at least 1.0, got {0}")]
    InvalidBackoffMultiplier(f64),
}

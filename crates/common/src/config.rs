//! Application configuration.

use serde::Deserialize;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Worker (scheduler and runner) configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Admission control configuration.
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Lease scheduler and execution runner settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Whether this process claims and executes jobs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay between claim cycles, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How long a claimed job stays leased, in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Maximum jobs claimed per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Maximum jobs from one batch executing at the same time.
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,
}

/// Per-tenant admission settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Submissions accepted per tenant inside one window.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Length of the sliding window, in seconds.
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    /// Maximum PENDING + RUNNING jobs per tenant.
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: u64,
    /// Retry budget used when a submission does not name one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: i32,
    /// How often idle tenant windows are dropped, in seconds.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

const fn default_true() -> bool {
    true
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_lease_secs() -> u64 {
    120
}

const fn default_batch_size() -> u64 {
    5
}

const fn default_max_concurrent_executions() -> usize {
    5
}

const fn default_rate_limit() -> usize {
    10
}

const fn default_rate_window_secs() -> u64 {
    60
}

const fn default_max_active_jobs() -> u64 {
    5
}

const fn default_max_retries() -> i32 {
    3
}

const fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_secs: default_poll_interval_secs(),
            lease_secs: default_lease_secs(),
            batch_size: default_batch_size(),
            max_concurrent_executions: default_max_concurrent_executions(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window_secs(),
            max_active_jobs: default_max_active_jobs(),
            default_max_retries: default_max_retries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl WorkerConfig {
    /// Delay between claim cycles.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Lease duration handed out on claim.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl AdmissionConfig {
    /// Sliding window length.
    #[must_use]
    pub const fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `JOBQ_ENV`)
    /// 4. Environment variables with `JOBQ__` prefix, e.g. `JOBQ__DATABASE__URL`
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("JOBQ_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("JOBQ")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

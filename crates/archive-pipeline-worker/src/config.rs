//! Worker configuration
//!
//! Sources, later ones overriding earlier ones:
//! - `config/default.toml`
//! - `config/{environment}.toml`
//! - Environment variables (`ARCHIVE_PIPELINE__SECTION__KEY`)
//! - Command-line arguments (applied in `main`)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub worker: WorkerSection,
    pub database: DatabaseConfig,
    pub nats: NatsSection,
    pub storage: StorageSection,
    pub schema: SchemaSection,
    pub publish: PublishSection,
    pub doi: DoiSection,
    pub sweep: SweepSection,
    pub logging: LoggingConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// Tasks executed concurrently
    pub concurrency: usize,
    /// Attempts per task, the first one included
    pub max_attempts: u32,
    /// Linear backoff unit in milliseconds
    pub retry_backoff_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_attempts: 5,
            retry_backoff_ms: 500,
        }
    }
}

impl WorkerSection {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool, raised to cover worker concurrency
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connect_timeout_seconds: u64,

    /// Per-statement limit in seconds; 0 keeps the server default
    pub statement_timeout_seconds: u64,

    /// Run migrations on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/archive_pipeline".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_seconds: 30,
            statement_timeout_seconds: 30,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Option<Duration> {
        match self.statement_timeout_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        }
    }
}

/// NATS transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsSection {
    /// Use NATS for tasks and events instead of in-process channels
    pub enabled: bool,
    pub url: String,
    pub client_name: String,
    pub subject_prefix: String,
    /// Queue group shared by all workers
    pub queue_group: String,
}

impl Default for NatsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "nats://localhost:4222".to_string(),
            client_name: "archive-pipeline-worker".to_string(),
            subject_prefix: "archive".to_string(),
            queue_group: "archive-workers".to_string(),
        }
    }
}

/// Blob storage access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// HTTP request timeout for blob reads
    pub request_timeout_seconds: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 300,
        }
    }
}

/// Metadata schema settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSection {
    pub current_version: String,
    /// Defaults to `[current_version]` when empty
    pub allowed_versions: Vec<String>,
    /// Directory overriding the bundled schemas
    pub schema_dir: Option<PathBuf>,
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            current_version: archive_pipeline_service::schema::DEFAULT_SCHEMA_VERSION.to_string(),
            allowed_versions: Vec::new(),
            schema_dir: None,
        }
    }
}

impl SchemaSection {
    pub fn allowed(&self) -> Vec<String> {
        if self.allowed_versions.is_empty() {
            vec![self.current_version.clone()]
        } else {
            self.allowed_versions.clone()
        }
    }
}

/// Publish view settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSection {
    pub archive_url: String,
    pub published_by: String,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            archive_url: archive_pipeline_service::render::DEFAULT_ARCHIVE_URL.to_string(),
            published_by: "DANDI publish".to_string(),
        }
    }
}

/// DataCite settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoiSection {
    pub enabled: bool,
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
}

impl Default for DoiSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: archive_pipeline_service::doi::DEFAULT_DATACITE_API_URL.to_string(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: 30,
        }
    }
}

/// Stale validation sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSection {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// How long an entity may stay in VALIDATING before it is re-enqueued
    pub stale_after_seconds: u64,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            stale_after_seconds: 1800,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Use JSON formatting
    pub json_format: bool,

    /// Include thread IDs
    pub include_thread_ids: bool,

    /// Include target module
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl WorkerSettings {
    /// Load configuration from files and environment
    ///
    /// # Errors
    ///
    /// Returns an error if a present file or variable cannot be parsed
    pub fn load(config_dir: impl Into<PathBuf>, environment: &str) -> Result<Self, ConfigError> {
        let config_dir = config_dir.into();

        let config = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", environment))).required(false))
            // e.g. ARCHIVE_PIPELINE__WORKER__CONCURRENCY=16
            .add_source(
                Environment::with_prefix("ARCHIVE_PIPELINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

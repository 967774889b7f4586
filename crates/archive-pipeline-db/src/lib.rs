//! Persistence and messaging for the archive pipeline
//!
//! This crate provides:
//! - Repository traits for blobs, assets and versions
//! - A PostgreSQL implementation with SQLx (one transaction per state transition)
//! - An in-memory implementation for tests and local runs
//! - Connection pool management and migrations
//! - Task queues (in-process channel, NATS) and event publishers
//!
//! # Example
//!
//! ```rust,no_run
//! use archive_pipeline_db::{create_pool, PoolConfig, PostgresRepository};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PoolConfig::new("postgres://localhost/archive_pipeline").max_connections(10);
//! let pool = create_pool(&config).await?;
//! let repo = PostgresRepository::new(pool);
//! # Ok(())
//! # }
//! ```

// Re-export core domain types for convenience
pub use archive_pipeline_core;

pub mod error;
pub mod events;
pub mod memory;
pub mod nats;
pub mod pool;
pub mod postgres;
pub mod queue;
pub mod repository;

pub use error::{DbError, DbResult};
pub use events::{ChannelEventPublisher, CompositeEventPublisher, EventPublisher};
pub use memory::InMemoryRepository;
pub use nats::{NatsConfig, NatsEventPublisher, NatsSubscriberConfig, NatsTaskQueue, NatsTaskSource};
pub use pool::{close_pool, create_pool, run_migrations, verify_pool_health, PoolConfig};
pub use postgres::PostgresRepository;
pub use queue::{LocalTaskQueue, LocalTaskReceiver, TaskQueue, TaskSource};
pub use repository::{AssetRepository, BlobRepository, ChecksumWrite, VersionRepository};

// Re-export sqlx types that users may need
pub use sqlx::postgres::PgPool;

/// Default database URL environment variable name
pub const DEFAULT_DATABASE_URL_ENV: &str = "DATABASE_URL";

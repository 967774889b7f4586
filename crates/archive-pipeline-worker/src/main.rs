//! Archive pipeline worker
//!
//! Wires repositories, transport and pipeline services, then runs the worker
//! pool and the stale-validation sweep until SIGINT or SIGTERM. The database
//! pool is closed after both have stopped.

mod config;
mod telemetry;

use anyhow::{Context, Result};
use archive_pipeline_db::{
    close_pool, create_pool, nats, AssetRepository, BlobRepository, CompositeEventPublisher,
    EventPublisher, InMemoryRepository, LocalTaskQueue, NatsConfig, NatsEventPublisher,
    NatsSubscriberConfig, NatsTaskQueue, PgPool, PoolConfig, PostgresRepository, TaskQueue,
    TaskSource, VersionRepository,
};
use archive_pipeline_service::{
    DataCiteClient, DataCiteConfig, DefaultBlobReader, DefaultPublishRenderer, DisabledDoiClient,
    DoiClient, JsonSchemaValidator, PipelineServices, RenderConfig, SchemaConfig,
    StaleValidationSweeper, WorkerConfig, WorkerPool,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::WorkerSettings;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory
    #[arg(short, long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: String,

    /// Environment (development, production, etc.)
    #[arg(short, long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// NATS server URL; enables the NATS transport
    #[arg(long, env = "NATS_URL")]
    nats_url: Option<String>,

    /// Tasks executed concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Keep all state in memory instead of PostgreSQL
    #[arg(long)]
    in_memory: bool,
}

/// Repository handles, one per entity, and the pool behind them
struct Repositories {
    blobs: Arc<dyn BlobRepository>,
    assets: Arc<dyn AssetRepository>,
    versions: Arc<dyn VersionRepository>,
    pool: Option<PgPool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut settings = WorkerSettings::load(&args.config_dir, &args.environment)
        .context("Failed to load configuration")?;

    if let Some(url) = args.database_url {
        settings.database.url = url;
    }
    if let Some(url) = args.nats_url {
        settings.nats.url = url;
        settings.nats.enabled = true;
    }
    if let Some(concurrency) = args.concurrency {
        settings.worker.concurrency = concurrency;
    }
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }

    telemetry::init_with_config(&telemetry::TelemetryConfig::from(&settings.logging))
        .context("Failed to initialize logging")?;

    info!(environment = %args.environment, "Starting archive pipeline worker");

    let repos = setup_repositories(&settings, args.in_memory).await?;
    let shutdown = CancellationToken::new();

    // Events only inform observers; without NATS they go nowhere
    let mut events = CompositeEventPublisher::new();

    let nats_client = if settings.nats.enabled {
        let client = nats::connect(&nats_config(&settings))
            .await
            .context("Failed to connect to NATS")?;
        events = events.with(Arc::new(NatsEventPublisher::new(
            client.clone(),
            nats_config(&settings),
        )));
        Some(client)
    } else {
        None
    };
    let events: Arc<dyn EventPublisher> = Arc::new(events);

    let (queue, source): (Arc<dyn TaskQueue>, Box<dyn TaskSource>) = match nats_client {
        Some(client) => {
            let queue = NatsTaskQueue::new(client, nats_config(&settings));
            let source = queue
                .subscribe(NatsSubscriberConfig::new(settings.nats.queue_group.clone()))
                .await
                .context("Failed to subscribe to task subjects")?;
            (Arc::new(queue), Box::new(source))
        }
        None => {
            let (queue, receiver) = LocalTaskQueue::channel();
            (Arc::new(queue), Box::new(receiver))
        }
    };

    let schema_config = SchemaConfig {
        current_version: settings.schema.current_version.clone(),
        allowed_versions: settings.schema.allowed(),
        schema_dir: settings.schema.schema_dir.clone(),
    };

    let doi: Arc<dyn DoiClient> = if settings.doi.enabled {
        Arc::new(
            DataCiteClient::new(DataCiteConfig {
                api_url: settings.doi.api_url.clone(),
                username: settings.doi.username.clone(),
                password: settings.doi.password.clone(),
                timeout: Duration::from_secs(settings.doi.timeout_seconds),
            })
            .context("Failed to create DataCite client")?,
        )
    } else {
        Arc::new(DisabledDoiClient)
    };

    let services = PipelineServices::builder(
        repos.blobs.clone(),
        repos.assets.clone(),
        repos.versions.clone(),
    )
    .queue(queue.clone())
    .events(events)
    .reader(Arc::new(
        DefaultBlobReader::new(Duration::from_secs(settings.storage.request_timeout_seconds))
            .context("Failed to create blob reader")?,
    ))
    .validator(Arc::new(
        JsonSchemaValidator::new(&schema_config).context("Failed to compile metadata schemas")?,
    ))
    .renderer(Arc::new(DefaultPublishRenderer::new(RenderConfig {
        archive_url: settings.publish.archive_url.clone(),
        published_by: settings.publish.published_by.clone(),
    })))
    .doi_client(doi)
    .build()
    .context("Failed to wire pipeline services")?;

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if settings.sweep.enabled {
        let sweeper = StaleValidationSweeper::new(
            repos.assets.clone(),
            repos.versions.clone(),
            queue.clone(),
            Duration::from_secs(settings.sweep.stale_after_seconds),
        )
        .context("Invalid sweep configuration")?;
        handles.push(tokio::spawn(sweeper.run(
            Duration::from_secs(settings.sweep.interval_seconds),
            shutdown.clone(),
        )));
    }

    let pool = WorkerPool::new(
        services.executor.clone(),
        queue,
        WorkerConfig {
            concurrency: settings.worker.concurrency,
            max_attempts: settings.worker.max_attempts,
            retry_backoff: settings.worker.retry_backoff(),
        },
        shutdown.clone(),
    );
    handles.push(tokio::spawn(pool.run(source)));

    shutdown_signal().await;
    shutdown.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task panicked");
        }
    }

    if let Some(pool) = repos.pool {
        close_pool(pool).await;
    }

    info!("Worker shutdown complete");
    Ok(())
}

async fn setup_repositories(settings: &WorkerSettings, in_memory: bool) -> Result<Repositories> {
    if in_memory {
        warn!("Using in-memory storage; state is lost on exit");
        let repo = Arc::new(InMemoryRepository::new());
        return Ok(Repositories {
            blobs: repo.clone(),
            assets: repo.clone(),
            versions: repo,
            pool: None,
        });
    }

    let pool_config = PoolConfig::new(&settings.database.url)
        .min_connections(settings.database.min_connections)
        .max_connections(settings.database.max_connections)
        .acquire_timeout(Duration::from_secs(settings.database.connect_timeout_seconds))
        .statement_timeout(settings.database.statement_timeout())
        .run_migrations(settings.database.run_migrations)
        .log_statements(settings.logging.level == "trace")
        .sized_for(settings.worker.concurrency);

    let pool = create_pool(&pool_config)
        .await
        .context("Failed to create database connection pool")?;

    let repo = Arc::new(PostgresRepository::new(pool.clone()));
    Ok(Repositories {
        blobs: repo.clone(),
        assets: repo.clone(),
        versions: repo,
        pool: Some(pool),
    })
}

fn nats_config(settings: &WorkerSettings) -> NatsConfig {
    NatsConfig::new(settings.nats.url.clone())
        .with_client_name(settings.nats.client_name.clone())
        .with_subject_prefix(settings.nats.subject_prefix.clone())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

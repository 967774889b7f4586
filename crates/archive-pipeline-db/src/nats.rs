//! NATS transport for tasks and events
//!
//! Tasks are published to `{prefix}.tasks.{kind}` and consumed through a
//! queue-group subscription, so each task is delivered to one worker of the
//! group. Events go to `{prefix}.events.{event_name}` for external observers.
//!
//! Core NATS is at-most-once. A task lost in transit is recovered by the
//! stale-validation sweep or by re-submission; handlers stay idempotent.

use async_nats::{Client, ConnectOptions, Subscriber};
use async_trait::async_trait;
use archive_pipeline_core::{PipelineEvent, TaskEnvelope};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{DbError, DbResult};
use crate::events::EventPublisher;
use crate::queue::{TaskQueue, TaskSource};

/// NATS connection configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL
    pub server_url: String,

    /// Client name for identification
    pub client_name: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Reconnect delay
    pub reconnect_delay: Duration,

    /// Root of every subject this pipeline uses
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            server_url: "nats://localhost:4222".to_string(),
            client_name: "archive-pipeline".to_string(),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            subject_prefix: "archive".to_string(),
        }
    }
}

impl NatsConfig {
    /// Create new configuration
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Set client name
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set subject prefix
    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Subject a task kind is published to
    pub fn task_subject(&self, kind: &str) -> String {
        format!("{}.tasks.{}", self.subject_prefix, kind)
    }

    /// Wildcard covering every task subject
    pub fn task_wildcard(&self) -> String {
        format!("{}.tasks.>", self.subject_prefix)
    }

    /// Subject an event is published to
    pub fn event_subject(&self, event: &PipelineEvent) -> String {
        format!("{}.events.{}", self.subject_prefix, event.event_name())
    }
}

/// Connect to NATS using the given configuration
pub async fn connect(config: &NatsConfig) -> DbResult<Client> {
    info!("Connecting to NATS server at {}", config.server_url);

    let reconnect_delay = config.reconnect_delay;
    let client = ConnectOptions::new()
        .name(&config.client_name)
        .connection_timeout(config.connect_timeout)
        .reconnect_delay_callback(move |attempts| {
            if attempts > 5 {
                warn!("NATS reconnection attempt #{}", attempts);
            }
            reconnect_delay
        })
        .connect(config.server_url.as_str())
        .await
        .map_err(|e| DbError::Configuration(format!("Failed to connect to NATS: {}", e)))?;

    info!("Successfully connected to NATS");
    Ok(client)
}

/// Task queue publishing envelopes to NATS
#[derive(Clone)]
pub struct NatsTaskQueue {
    client: Client,
    config: NatsConfig,
}

impl NatsTaskQueue {
    /// Create a queue on an existing connection
    pub fn new(client: Client, config: NatsConfig) -> Self {
        Self { client, config }
    }

    /// Subscribe to every task subject within a queue group
    pub async fn subscribe(&self, subscriber: NatsSubscriberConfig) -> DbResult<NatsTaskSource> {
        let subject = subscriber
            .subject
            .clone()
            .unwrap_or_else(|| self.config.task_wildcard());

        info!(subject = %subject, queue_group = %subscriber.queue_group, "Subscribing to tasks");

        let inner = self
            .client
            .queue_subscribe(subject, subscriber.queue_group.clone())
            .await
            .map_err(|e| DbError::Messaging(format!("NATS subscribe failed: {}", e)))?;

        Ok(NatsTaskSource { inner })
    }

    /// Check if connected to NATS
    pub fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }
}

#[async_trait]
impl TaskQueue for NatsTaskQueue {
    async fn enqueue(&self, envelope: TaskEnvelope) -> DbResult<()> {
        let subject = self.config.task_subject(envelope.task.kind());
        let payload = serde_json::to_vec(&envelope)?;

        debug!(task_id = %envelope.id, subject = %subject, "Publishing task to NATS");

        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| {
                error!("Failed to publish task to NATS: {}", e);
                DbError::Messaging(format!("NATS publish failed: {}", e))
            })
    }
}

/// Task source reading envelopes from a NATS queue-group subscription
pub struct NatsTaskSource {
    inner: Subscriber,
}

#[async_trait]
impl TaskSource for NatsTaskSource {
    async fn next(&mut self) -> Option<TaskEnvelope> {
        loop {
            let message = self.inner.next().await?;
            match serde_json::from_slice::<TaskEnvelope>(&message.payload) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    warn!(subject = %message.subject, error = %e, "Dropping undecodable task message");
                }
            }
        }
    }
}

/// Event publisher writing JSON events to NATS
#[derive(Clone)]
pub struct NatsEventPublisher {
    client: Client,
    config: NatsConfig,
}

impl NatsEventPublisher {
    /// Create a publisher on an existing connection
    pub fn new(client: Client, config: NatsConfig) -> Self {
        Self { client, config }
    }

    /// Flush pending messages
    pub async fn flush(&self) -> DbResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| DbError::Messaging(format!("Failed to flush NATS: {}", e)))
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: PipelineEvent) -> DbResult<()> {
        let subject = self.config.event_subject(&event);
        let payload = serde_json::to_vec(&event)?;

        debug!("Publishing event {} to subject: {}", event.event_name(), subject);

        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| {
                error!("Failed to publish event to NATS: {}", e);
                DbError::Messaging(format!("NATS publish failed: {}", e))
            })
    }
}

/// NATS task subscriber configuration
#[derive(Debug, Clone)]
pub struct NatsSubscriberConfig {
    /// Subject pattern to subscribe to; defaults to every task subject
    pub subject: Option<String>,

    /// Queue group name (for load balancing)
    pub queue_group: String,
}

impl NatsSubscriberConfig {
    /// Create new subscriber configuration
    pub fn new(queue_group: impl Into<String>) -> Self {
        Self {
            subject: None,
            queue_group: queue_group.into(),
        }
    }

    /// Restrict to a subject pattern
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

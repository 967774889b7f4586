//! Event publishing
//!
//! Components publish committed facts through an [`EventPublisher`]. Events
//! are notifications for observers: no follow-up work depends on their
//! delivery. The in-process [`ChannelEventPublisher`] never waits for its
//! reader; [`CompositeEventPublisher`] fans out to several publishers.

use async_trait::async_trait;
use archive_pipeline_core::PipelineEvent;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Sink for pipeline events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: PipelineEvent) -> DbResult<()>;
}

/// Publisher feeding an in-process channel
///
/// Events that do not fit are dropped with a warning.
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<PipelineEvent>,
}

impl ChannelEventPublisher {
    /// Create a bounded channel and return the publisher plus the receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: PipelineEvent) -> DbResult<()> {
        debug!(event = event.event_name(), "Publishing event to channel");
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!(event = event.event_name(), "Event channel full, dropping event");
                Ok(())
            }
            Err(TrySendError::Closed(event)) => Err(DbError::Messaging(format!(
                "Event channel closed: {}",
                event.event_type
            ))),
        }
    }
}

/// Publishes to every inner publisher in order
///
/// The first failure is returned after all publishers have been tried.
#[derive(Clone, Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    /// Create an empty composite
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a publisher
    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Number of inner publishers
    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    /// Whether no publisher is configured
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: PipelineEvent) -> DbResult<()> {
        let mut first_error = None;

        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(event.clone()).await {
                warn!(error = %e, event = event.event_name(), "Event publisher failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! Task queue abstractions
//!
//! Producers enqueue [`TaskEnvelope`]s through a shared [`TaskQueue`]; one
//! consumer per process drains a [`TaskSource`]. Delivery is at-least-once:
//! handlers must be idempotent.
//!
//! Handlers enqueue follow-up tasks while holding a worker slot, so the
//! in-process queue never makes a producer wait on the consumer.

use async_trait::async_trait;
use archive_pipeline_core::{Task, TaskEnvelope};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Producer side of a task queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue an envelope for delivery
    ///
    /// # Returns
    /// * `Ok(())` - The envelope was handed to the transport
    /// * `Err(DbError::Messaging)` - If the transport is closed or unreachable
    async fn enqueue(&self, envelope: TaskEnvelope) -> DbResult<()>;

    /// Wrap a task in a first-attempt envelope and enqueue it
    async fn submit(&self, task: Task) -> DbResult<TaskEnvelope> {
        let envelope = TaskEnvelope::new(task);
        self.enqueue(envelope.clone()).await?;
        Ok(envelope)
    }
}

/// Consumer side of a task queue
#[async_trait]
pub trait TaskSource: Send {
    /// Wait for the next envelope; `None` once the source is exhausted
    async fn next(&mut self) -> Option<TaskEnvelope>;
}

#[async_trait]
impl<S: TaskSource + ?Sized> TaskSource for Box<S> {
    async fn next(&mut self) -> Option<TaskEnvelope> {
        (**self).next().await
    }
}

/// In-process queue backed by an unbounded tokio mpsc channel
#[derive(Debug, Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::UnboundedSender<TaskEnvelope>,
}

/// Receiving half of a [`LocalTaskQueue`]
#[derive(Debug)]
pub struct LocalTaskReceiver {
    receiver: mpsc::UnboundedReceiver<TaskEnvelope>,
}

impl LocalTaskQueue {
    /// Create a queue and its receiver
    pub fn channel() -> (Self, LocalTaskReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, LocalTaskReceiver { receiver })
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, envelope: TaskEnvelope) -> DbResult<()> {
        debug!(task_id = %envelope.id, kind = envelope.task.kind(), attempt = envelope.attempt, "Enqueueing task");
        self.sender
            .send(envelope)
            .map_err(|e| DbError::Messaging(format!("Local task queue closed: {}", e.0.task)))
    }
}

impl LocalTaskReceiver {
    /// Receive without waiting; `None` when nothing is queued
    pub fn try_next(&mut self) -> Option<TaskEnvelope> {
        self.receiver.try_recv().ok()
    }
}

#[async_trait]
impl TaskSource for LocalTaskReceiver {
    async fn next(&mut self) -> Option<TaskEnvelope> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_pipeline_core::BlobId;

    #[tokio::test]
    async fn test_local_queue_fifo() {
        let (queue, mut receiver) = LocalTaskQueue::channel();
        let first = queue
            .submit(Task::CalculateSha256 {
                blob_id: BlobId::new(),
            })
            .await
            .unwrap();
        let second = queue
            .submit(Task::DeleteDoi {
                doi: "10.80507/dandi.000001".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(receiver.next().await.unwrap(), first);
        assert_eq!(receiver.next().await.unwrap(), second);
        assert!(receiver.try_next().is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_is_transient_error() {
        let (queue, receiver) = LocalTaskQueue::channel();
        drop(receiver);

        let err = queue
            .submit(Task::DeleteDoi {
                doi: "10.80507/x".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_source_ends_when_producers_dropped() {
        let (queue, mut receiver) = LocalTaskQueue::channel();
        drop(queue);
        assert!(receiver.next().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_never_waits_for_consumer() {
        let (queue, mut receiver) = LocalTaskQueue::channel();
        for _ in 0..5000 {
            queue
                .submit(Task::CalculateSha256 {
                    blob_id: BlobId::new(),
                })
                .await
                .unwrap();
        }
        let mut drained = 0;
        while receiver.try_next().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 5000);
    }
}

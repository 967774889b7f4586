//! Worker pool
//!
//! Pulls envelopes from a [`TaskSource`] and runs them on at most
//! `concurrency` tokio tasks. Each execution runs inside a `task` span
//! carrying the task id, kind and attempt, so every log line of a handler is
//! attributable without a global logger.
//!
//! Retryable failures are re-enqueued with linear backoff until
//! `max_attempts`; anything else is logged and dropped.

use archive_pipeline_core::TaskEnvelope;
use archive_pipeline_db::{TaskQueue, TaskSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::error::ServiceResult;
use crate::executor::TaskHandler;

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum tasks executing at once
    pub concurrency: usize,
    /// Attempts per task, the first one included
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff` before re-enqueueing
    pub retry_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_attempts: 5,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDisposition {
    /// Handler succeeded
    Completed,
    /// Failed, next attempt enqueued
    Retried { next_attempt: u32 },
    /// Failed permanently or out of attempts
    Failed { error: String },
    /// Retry abandoned because the pool is shutting down
    Abandoned,
}

/// Bounded-concurrency task runner
#[derive(Clone)]
pub struct WorkerPool {
    handler: Arc<dyn TaskHandler>,
    queue: Arc<dyn TaskQueue>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Create a pool; `queue` receives retries and `shutdown` stops it
    pub fn new(
        handler: Arc<dyn TaskHandler>,
        queue: Arc<dyn TaskQueue>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            queue,
            config,
            shutdown,
        }
    }

    /// Run until the source is exhausted or shutdown is requested, then wait
    /// for in-flight tasks
    pub async fn run<S: TaskSource>(self, mut source: S) {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut running = JoinSet::new();

        info!(concurrency, max_attempts = self.config.max_attempts, "Worker pool started");

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let envelope = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = source.next() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            while let Some(result) = running.try_join_next() {
                log_join_result(result);
            }

            let pool = self.clone();
            running.spawn(async move { pool.execute_with_permit(envelope, permit).await });
        }

        info!(in_flight = running.len(), "Worker pool draining");
        while let Some(result) = running.join_next().await {
            log_join_result(result);
        }
        info!("Worker pool stopped");
    }

    async fn execute_with_permit(
        &self,
        envelope: TaskEnvelope,
        permit: OwnedSemaphorePermit,
    ) -> TaskDisposition {
        let span = task_span(&envelope);
        let result = self.handler.handle(&envelope.task).instrument(span.clone()).await;
        drop(permit);

        self.settle(envelope, result).instrument(span).await
    }

    /// Execute one delivery and apply the retry policy
    pub async fn execute(&self, envelope: TaskEnvelope) -> TaskDisposition {
        let span = task_span(&envelope);
        async {
            let result = self.handler.handle(&envelope.task).await;
            self.settle(envelope, result).await
        }
        .instrument(span)
        .await
    }

    async fn settle(
        &self,
        envelope: TaskEnvelope,
        result: ServiceResult<()>,
    ) -> TaskDisposition {
        let error = match result {
            Ok(()) => {
                info!(target_id = %envelope.task.target(), "Task completed");
                return TaskDisposition::Completed;
            }
            Err(e) => e,
        };

        if !error.is_retryable() || envelope.attempt >= self.config.max_attempts {
            error!(error = %error, retryable = error.is_retryable(), "Task failed");
            return TaskDisposition::Failed {
                error: error.to_string(),
            };
        }

        let backoff = self.config.retry_backoff * envelope.attempt;
        warn!(error = %error, backoff_ms = backoff.as_millis() as u64, "Task failed, retrying");

        let retry = envelope.retry();
        let next_attempt = retry.attempt;
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                warn!("Shutdown during backoff, retry abandoned");
                TaskDisposition::Abandoned
            }
            enqueued = async {
                tokio::time::sleep(backoff).await;
                self.queue.enqueue(retry).await
            } => match enqueued {
                Ok(()) => TaskDisposition::Retried { next_attempt },
                Err(e) => {
                    error!(error = %e, "Failed to enqueue retry");
                    TaskDisposition::Failed { error: e.to_string() }
                }
            },
        }
    }
}

fn task_span(envelope: &TaskEnvelope) -> Span {
    info_span!(
        "task",
        task_id = %envelope.id,
        kind = envelope.task.kind(),
        attempt = envelope.attempt
    )
}

fn log_join_result(result: Result<TaskDisposition, tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Worker task panicked");
    }
}

//! In-process FIFO queue that runs webhook jobs one at a time.
//!
//! A single worker task pulls jobs off an unbounded flume channel and runs
//! them in submission order, waiting at least `job_interval` between the
//! starts of consecutive jobs. Each job runs in its own task so a panic is
//! contained to that job. Pending jobs live only in memory; Stripe redelivers
//! anything lost on restart.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::queue_config::{QueueConfig, queue_warning_threshold};
use crate::stripe_events::WebhookEvent;

/// Processes one webhook event. Called by the queue worker only.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> Result<()>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("webhook queue is shut down")]
    Closed,
    #[error("job for event {event_id} failed: {reason}")]
    JobFailed { event_id: String, reason: String },
    #[error("job for event {event_id} panicked")]
    Panicked { event_id: String },
    #[error("job for event {event_id} was dropped before completion")]
    Dropped { event_id: String },
}

struct QueueJob {
    event: WebhookEvent,
    enqueued_at: Instant,
    done: oneshot::Sender<Result<(), QueueError>>,
}

/// Resolves once the worker has finished the submitted job
#[derive(Debug)]
pub struct JobTicket {
    event_id: String,
    done: oneshot::Receiver<Result<(), QueueError>>,
}

impl JobTicket {
    pub async fn wait(self) -> Result<(), QueueError> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Dropped {
                event_id: self.event_id,
            }),
        }
    }
}

/// Producer side of the queue. Cheap to clone; the worker exits once every
/// clone has been dropped and the backlog is drained.
#[derive(Clone)]
pub struct WebhookQueue {
    sender: flume::Sender<QueueJob>,
    soft_limit: usize,
}

impl WebhookQueue {
    /// Spawn the worker and return the producer handle plus the worker's
    /// join handle
    pub fn start(handler: Arc<dyn JobHandler>, config: QueueConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = flume::unbounded::<QueueJob>();

        info!(
            job_interval_ms = config.job_interval.as_millis() as u64,
            "Starting webhook queue worker"
        );

        let worker = tokio::spawn(run_worker(receiver, handler, config.job_interval));

        (
            Self {
                sender,
                soft_limit: config.soft_limit,
            },
            worker,
        )
    }

    /// Queue an event and return a ticket for its completion
    pub fn submit(&self, event: WebhookEvent) -> Result<JobTicket, QueueError> {
        let (done_tx, done_rx) = oneshot::channel();
        let event_id = event.id.clone();

        let job = QueueJob {
            event,
            enqueued_at: Instant::now(),
            done: done_tx,
        };

        if self.sender.send(job).is_err() {
            error!(event_id = %event_id, "Webhook queue worker is gone, rejecting job");
            return Err(QueueError::Closed);
        }

        let depth = self.depth();
        metrics::gauge!("webhook.queue.depth").set(depth as f64);
        if depth >= queue_warning_threshold(self.soft_limit) {
            warn!(
                depth,
                limit = self.soft_limit,
                "Webhook queue is backing up"
            );
        }
        debug!(event_id = %event_id, depth, "Queued webhook job");

        Ok(JobTicket {
            event_id,
            done: done_rx,
        })
    }

    /// Queue an event and wait for the worker to finish it
    pub async fn enqueue(&self, event: WebhookEvent) -> Result<(), QueueError> {
        self.submit(event)?.wait().await
    }

    /// Jobs queued but not yet started
    pub fn depth(&self) -> usize {
        self.sender.len()
    }
}

async fn run_worker(
    receiver: flume::Receiver<QueueJob>,
    handler: Arc<dyn JobHandler>,
    job_interval: Duration,
) {
    let mut next_start = Instant::now();

    while let Ok(job) = receiver.recv_async().await {
        tokio::time::sleep_until(next_start).await;
        let started = Instant::now();
        next_start = started + job_interval;

        metrics::gauge!("webhook.queue.depth").set(receiver.len() as f64);

        let QueueJob {
            event,
            enqueued_at,
            done,
        } = job;
        let event_id = event.id.clone();
        let event_type = event.event_type.clone();
        let waited_ms = started.duration_since(enqueued_at).as_millis() as u64;

        let job_handler = handler.clone();
        let outcome = tokio::spawn(async move { job_handler.handle(&event).await }).await;

        let result = match outcome {
            Ok(Ok(())) => {
                debug!(
                    event_id = %event_id,
                    event_type = %event_type,
                    waited_ms,
                    "Webhook job completed"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                error!(
                    event_id = %event_id,
                    event_type = %event_type,
                    waited_ms,
                    error = %format!("{:#}", e),
                    "Webhook job failed"
                );
                metrics::counter!("webhook.job.failed", "reason" => "error").increment(1);
                Err(QueueError::JobFailed {
                    event_id: event_id.clone(),
                    reason: format!("{:#}", e),
                })
            }
            Err(join_error) if join_error.is_panic() => {
                error!(
                    event_id = %event_id,
                    event_type = %event_type,
                    waited_ms,
                    "Webhook job panicked"
                );
                metrics::counter!("webhook.job.failed", "reason" => "panic").increment(1);
                Err(QueueError::Panicked {
                    event_id: event_id.clone(),
                })
            }
            Err(join_error) => {
                error!(
                    event_id = %event_id,
                    event_type = %event_type,
                    error = %join_error,
                    "Webhook job was cancelled"
                );
                metrics::counter!("webhook.job.failed", "reason" => "cancelled").increment(1);
                Err(QueueError::Dropped {
                    event_id: event_id.clone(),
                })
            }
        };

        metrics::histogram!("webhook.job.duration_ms")
            .record(started.elapsed().as_millis() as f64);

        // The submitter may have stopped waiting
        let _ = done.send(result);
    }

    info!("Webhook queue closed, worker exiting");
}

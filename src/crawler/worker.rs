//! Queue consumer pool
//!
//! A `Worker` leases messages from the queue and processes them concurrently,
//! bounded by a semaphore. Each message runs under a deadline shorter than
//! the queue's visibility timeout. Outcomes map onto the queue as follows:
//! - success: ack
//! - transient or persistence failure: release with the retry delay
//! - fatal failure: leave the lease to expire; the queue dead-letters the
//!   message after too many deliveries

use crate::config::Config;
use crate::crawler::{process_message, ArchiveContext, Resolution};
use crate::queue::Delivery;
use crate::ArchiveError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Messages processed at once
    pub concurrency: usize,
    /// Deadline for one message
    pub message_timeout: Duration,
    /// Delay before a retried message becomes visible again
    pub retry_delay: Duration,
    /// Sleep between polls of an empty queue
    pub idle_poll: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.worker.concurrency as usize,
            message_timeout: config.worker.message_timeout(),
            retry_delay: config.queue.retry_delay(),
            ..Self::default()
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            message_timeout: Duration::from_secs(240),
            retry_delay: Duration::from_secs(60),
            idle_poll: Duration::from_secs(5),
        }
    }
}

/// What happened to one delivery
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Processed and acknowledged
    Completed(Resolution),
    /// Released for a later retry
    Retrying(ArchiveError),
    /// Left for lease expiry
    Failed(ArchiveError),
}

/// Counters over processed deliveries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub stored: u64,
    pub already_stored: u64,
    pub crawled: u64,
    pub retrying: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Completed(Resolution::Stored { .. }) => self.stored += 1,
            DeliveryOutcome::Completed(Resolution::AlreadyStored) => self.already_stored += 1,
            DeliveryOutcome::Completed(Resolution::Crawled(_)) => self.crawled += 1,
            DeliveryOutcome::Retrying(_) => self.retrying += 1,
            DeliveryOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.stored + self.already_stored + self.crawled + self.retrying + self.failed
    }
}

/// Queue consumer pool that processes deliveries with bounded concurrency
#[derive(Clone)]
pub struct Worker {
    ctx: Arc<ArchiveContext>,
    options: WorkerOptions,
    permits: Arc<Semaphore>,
}

impl Worker {
    pub fn new(ctx: Arc<ArchiveContext>, options: WorkerOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
        Self {
            ctx,
            options,
            permits,
        }
    }

    /// Processes one delivery and settles its lease
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let kind = delivery.message.kind();
        let result = match tokio::time::timeout(
            self.options.message_timeout,
            process_message(&self.ctx, &delivery.message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ArchiveError::Timeout {
                after: self.options.message_timeout,
                operation: format!("processing {} message", kind),
            }),
        };

        match result {
            Ok(resolution) => {
                if let Err(e) = self.ctx.queue.ack(&delivery.lease).await {
                    // The message will be redelivered; consumers are idempotent
                    tracing::warn!("Failed to ack {} message: {}", kind, e);
                }
                DeliveryOutcome::Completed(resolution)
            }
            Err(e) if e.is_transient() || e.is_persistence() => {
                tracing::warn!(
                    receive_count = delivery.receive_count,
                    "Retrying {} message in {:?}: {}",
                    kind,
                    self.options.retry_delay,
                    e
                );
                if let Err(release_err) = self
                    .ctx
                    .queue
                    .release(&delivery.lease, self.options.retry_delay)
                    .await
                {
                    tracing::warn!("Failed to release {} message: {}", kind, release_err);
                }
                DeliveryOutcome::Retrying(e)
            }
            Err(e) => {
                tracing::error!(
                    receive_count = delivery.receive_count,
                    "Failed to process {} message: {}",
                    kind,
                    e
                );
                DeliveryOutcome::Failed(e)
            }
        }
    }

    /// Processes messages until the queue has nothing visible and nothing is in flight
    ///
    /// Messages enqueued by in-flight work (fan-out) are picked up before
    /// returning. Released and failed messages are not waited for.
    pub async fn drain(&self) -> crate::Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        let mut tasks = JoinSet::new();

        loop {
            let idle = self.fill(&mut tasks).await?;
            if idle && tasks.is_empty() {
                break;
            }
            if let Some(joined) = tasks.join_next().await {
                Self::collect(&mut stats, joined);
            }
        }

        tracing::info!(processed = stats.total(), "Queue drained");
        Ok(stats)
    }

    /// Processes messages until `shutdown` resolves, then waits for in-flight work
    pub async fn run_until<F>(&self, shutdown: F) -> crate::Result<WorkerStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stats = WorkerStats::default();
        let mut tasks = JoinSet::new();

        loop {
            let idle = self.fill(&mut tasks).await?;
            tokio::select! {
                _ = &mut shutdown => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::collect(&mut stats, joined);
                }
                _ = tokio::time::sleep(self.options.idle_poll), if idle => {}
            }
        }

        tracing::info!(in_flight = tasks.len(), "Worker stopping, waiting for in-flight messages");
        while let Some(joined) = tasks.join_next().await {
            Self::collect(&mut stats, joined);
        }
        Ok(stats)
    }

    /// Leases messages while permits are free; returns true if the queue ran dry
    async fn fill(&self, tasks: &mut JoinSet<DeliveryOutcome>) -> crate::Result<bool> {
        loop {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                return Ok(false);
            };
            let Some(delivery) = self.ctx.queue.receive().await? else {
                return Ok(true);
            };

            let worker = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.handle_delivery(delivery).await
            });
        }
    }

    fn collect(
        stats: &mut WorkerStats,
        joined: Result<DeliveryOutcome, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(outcome) => stats.record(&outcome),
            Err(e) => {
                tracing::error!("Worker task panicked: {}", e);
                stats.failed += 1;
            }
        }
    }
}

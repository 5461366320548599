//! Crawl dispatcher
//!
//! The runner is the only producer of top-level crawl work: it lists the
//! subjects with a resource kind enabled and enqueues one `crawl-resource`
//! message per subject. It never reads or writes watermarks.

use crate::model::{ResourceKind, WorkContext, WorkMessage};
use crate::queue::MessageQueue;
use crate::storage::{Storage, SubjectRegistry};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Enqueues one crawl message per subject for `kind`
///
/// With `enabled_only` unset every registered subject is dispatched,
/// regardless of its flags. Returns the number of messages sent.
pub async fn dispatch_crawls<R>(
    registry: &R,
    queue: &dyn MessageQueue,
    context: &WorkContext,
    kind: ResourceKind,
    enabled_only: bool,
) -> Result<usize>
where
    R: SubjectRegistry + ?Sized,
{
    let subjects = if enabled_only {
        registry.list_enabled(kind)?
    } else {
        registry.list_subjects()?
    };

    for subject in &subjects {
        queue
            .send(&WorkMessage::crawl_resource(subject.id, kind, context))
            .await?;
    }

    tracing::info!(resource = %kind, "Dispatched {} crawl messages", subjects.len());
    Ok(subjects.len())
}

/// Periodic dispatcher over a fixed set of resource kinds
pub struct Runner {
    storage: Arc<dyn Storage>,
    queue: Arc<dyn MessageQueue>,
    context: WorkContext,
    resources: Vec<ResourceKind>,
    interval: Duration,
}

impl Runner {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<dyn MessageQueue>,
        context: WorkContext,
        resources: Vec<ResourceKind>,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            queue,
            context,
            resources,
            interval,
        }
    }

    /// Dispatches every configured resource kind once
    pub async fn dispatch_round(&self) -> Result<usize> {
        let mut total = 0;
        for &kind in &self.resources {
            total += dispatch_crawls(
                self.storage.as_ref(),
                self.queue.as_ref(),
                &self.context,
                kind,
                true,
            )
            .await?;
        }
        Ok(total)
    }

    /// Dispatches a round every interval until `shutdown` resolves
    ///
    /// The first round runs immediately. A failed round is logged and the
    /// next one is attempted on schedule. Returns the number of rounds run.
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut rounds = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Runner stopping after {} rounds", rounds);
                    return rounds;
                }
                _ = ticker.tick() => {
                    rounds += 1;
                    match self.dispatch_round().await {
                        Ok(sent) => tracing::info!(round = rounds, "Dispatch round sent {} messages", sent),
                        Err(e) => tracing::error!(round = rounds, "Dispatch round failed: {}", e),
                    }
                }
            }
        }
    }

    /// Dispatches rounds forever
    pub async fn run_forever(&self) {
        self.run_until(std::future::pending::<()>()).await;
    }
}

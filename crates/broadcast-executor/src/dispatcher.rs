//! Dispatch loop (JQ consumer): pops due jobs off the coordination store and
//! hands each one to the executor. A job's dedup guard is released as soon
//! as it is dequeued — the zset removal already means it is no longer
//! queued, and the per-user lock in `Executor::run` prevents two runs for
//! the same user from overlapping. Releasing the guard any later would
//! block a continuation job from scheduling its own successor under the
//! same stable id while it is still running.

use std::sync::Arc;

use shared::redis::{JobPayload, JobQueue};

use crate::error::BexResult;
use crate::executor::Executor;
use crate::telegram::TelegramClient;

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub dequeued: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Dispatcher<Q: JobQueue, T: TelegramClient> {
    executor: Arc<Executor<Q, T>>,
    queue: Arc<Q>,
    concurrency: usize,
}

impl<Q: JobQueue + 'static, T: TelegramClient + 'static> Dispatcher<Q, T> {
    pub fn new(executor: Arc<Executor<Q, T>>, queue: Arc<Q>, concurrency: usize) -> Self {
        Self {
            executor,
            queue,
            concurrency,
        }
    }

    /// Pops up to `concurrency` due jobs and runs them concurrently, waiting
    /// for all of them to finish before returning.
    pub async fn run_once(&self) -> BexResult<DispatchReport> {
        let due = self.queue.dequeue_due(self.concurrency).await.map_err(shared::Error::from)?;
        let dequeued = due.len();

        let mut handles = Vec::with_capacity(dequeued);
        for (job_id, payload) in due {
            if let Err(e) = self.queue.complete(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "failed to release job dedup guard after dequeue");
            }

            let executor = self.executor.clone();
            handles.push(tokio::spawn(async move { Self::run_one(&executor, &job_id, payload).await }));
        }

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "broadcast job task panicked");
                    failed += 1;
                }
            }
        }

        Ok(DispatchReport {
            dequeued,
            succeeded,
            failed,
        })
    }

    async fn run_one(executor: &Executor<Q, T>, job_id: &str, payload: JobPayload) -> bool {
        match executor.run(job_id, payload).await {
            Ok(report) => {
                crate::metrics::record_job_outcome(&format!("{:?}", report.outcome));
                report.success
            }
            Err(e) => {
                tracing::error!(job_id, error = %e.safe_message(), "broadcast job execution failed");
                crate::metrics::record_job_outcome("execution-error");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::redis::{InMemoryJobQueue, JobQueue};

    #[tokio::test]
    async fn empty_queue_has_nothing_due() {
        let queue = InMemoryJobQueue::new();
        let due = queue.dequeue_due(4).await.unwrap();
        assert!(due.is_empty());
    }
}

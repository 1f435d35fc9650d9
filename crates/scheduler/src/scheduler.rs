//! The Scheduler (SCH): leader-elected, tick-based emission of broadcast
//! jobs for campaigns whose interval has elapsed.

use std::sync::Arc;

use chrono::Utc;
use shared::config::SchedulerConfig;
use shared::db::DbPool;
use shared::redis::{DistributedLock, JobPayload, JobQueue};
use shared::Result;
use sqlx::FromRow;

use crate::jitter::{deterministic_jitter_ms, run_slot};

const LEADER_LOCK_KEY: &str = "scheduler:lock";

#[derive(Debug, FromRow)]
struct DueCampaign {
    id: String,
    user_id: String,
    message: String,
    interval_seconds: i32,
}

/// Outcome of a single tick, used for logging and metrics.
#[derive(Debug, Default)]
pub struct TickReport {
    pub won_leadership: bool,
    pub considered: usize,
    pub enqueued: usize,
}

pub struct Scheduler<Q: JobQueue> {
    pool: DbPool,
    lock: DistributedLock,
    queue: Arc<Q>,
    config: SchedulerConfig,
}

impl<Q: JobQueue> Scheduler<Q> {
    pub fn new(pool: DbPool, lock: DistributedLock, queue: Arc<Q>, config: SchedulerConfig) -> Self {
        Self {
            pool,
            lock,
            queue,
            config,
        }
    }

    /// Runs one tick: attempts leadership, and if won, finds and enqueues due
    /// campaigns. Always releases the leader lock before returning.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let guard = match self.lock.acquire(LEADER_LOCK_KEY, self.config.lock_ttl_ms).await? {
            Some(guard) => guard,
            None => return Ok(TickReport::default()),
        };

        let result = self.enqueue_due_campaigns().await;

        if let Err(e) = self.lock.release(&guard).await {
            tracing::warn!(error = %e, "failed to release scheduler leader lock");
        }

        let (considered, enqueued) = result?;
        Ok(TickReport {
            won_leadership: true,
            considered,
            enqueued,
        })
    }

    async fn due_campaigns(&self) -> Result<Vec<DueCampaign>> {
        let rows = sqlx::query_as::<_, DueCampaign>(
            r#"
            SELECT c.id, c.user_id, c.message, c.interval_seconds
            FROM campaigns c
            WHERE c.is_active = true
              AND c.message <> ''
              AND EXISTS (
                  SELECT 1 FROM telegram_accounts a
                  WHERE a.user_id = c.user_id AND a.is_active = true
              )
              AND (
                  c.last_run_at IS NULL
                  OR EXTRACT(EPOCH FROM (now() - c.last_run_at)) >=
                     GREATEST(60, FLOOR(c.interval_seconds * $1::float8))
              )
            ORDER BY c.last_run_at ASC NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(self.config.early_factor)
        .bind(self.config.max_due_per_tick)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn enqueue_due_campaigns(&self) -> Result<(usize, usize)> {
        let due = self.due_campaigns().await?;
        let considered = due.len();
        let now = Utc::now();
        let mut enqueued = 0usize;

        for campaign in due {
            let slot = run_slot(now.timestamp(), campaign.interval_seconds);
            let jitter_ms = deterministic_jitter_ms(&campaign.user_id, slot, self.config.jitter_max_ms);
            let job_id = format!("sched-{}-{}-{}", campaign.id, campaign.user_id, slot);

            let payload = JobPayload {
                user_id: campaign.user_id.clone(),
                message: campaign.message.clone(),
                campaign_id: campaign.id.clone(),
                queued_at: now,
                interval_seconds: Some(campaign.interval_seconds),
            };

            match self.queue.enqueue(&job_id, &payload, jitter_ms).await {
                Ok(true) => {
                    enqueued += 1;
                    if let Err(e) = self.mark_run(&campaign.id, now).await {
                        tracing::warn!(campaign_id = %campaign.id, error = %e, "failed to update last_run_at");
                    }
                }
                Ok(false) => {
                    tracing::debug!(job_id = %job_id, "scheduler emission already queued for this slot");
                }
                Err(e) => {
                    tracing::warn!(campaign_id = %campaign.id, error = %e, "failed to enqueue scheduled job");
                }
            }
        }

        Ok((considered, enqueued))
    }

    async fn mark_run(&self, campaign_id: &str, now: chrono::DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE campaigns SET last_run_at = $1, updated_at = now() WHERE id = $2")
            .bind(now)
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

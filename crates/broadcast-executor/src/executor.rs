//! The Broadcast Executor (BEX): consumes one job payload, advances the
//! campaign's current cycle by up to `MAX_ATTEMPTS_PER_RUN` deliveries, and
//! may enqueue a continuation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use shared::config::{BotRole, BroadcastConfig};
use shared::db::DbPool;
use shared::models::{Campaign, TargetGroup, TelegramAccount};
use shared::redis::{DistributedLock, JobPayload, JobQueue};
use sqlx::FromRow;

use crate::classify::{classify, compute_retry_delay_ms};
use crate::error::{BexError, BexResult};
use crate::rate_governor::{GlobalWindow, PerAccountPacer};
use crate::result::{BexReport, ContinuationReason, Outcome, Summary};
use crate::telegram::TelegramClient;

pub struct Executor<Q: JobQueue, T: TelegramClient> {
    pool: DbPool,
    lock: DistributedLock,
    queue: Arc<Q>,
    telegram: Arc<T>,
    global_window: Arc<GlobalWindow>,
    pacer: Arc<PerAccountPacer>,
    config: BroadcastConfig,
    bot_role: BotRole,
}

#[derive(Debug, FromRow)]
struct StatusCount {
    status: String,
    count: i64,
}

impl<Q: JobQueue, T: TelegramClient> Executor<Q, T> {
    pub fn new(
        pool: DbPool,
        lock: DistributedLock,
        queue: Arc<Q>,
        telegram: Arc<T>,
        config: BroadcastConfig,
        global_mps: u32,
        bot_role: BotRole,
    ) -> Self {
        let pacer = Arc::new(PerAccountPacer::new(
            config.per_account_min_delay_ms,
            config.per_account_mpm,
        ));
        Self {
            pool,
            lock,
            queue,
            telegram,
            global_window: Arc::new(GlobalWindow::new(global_mps)),
            pacer,
            config,
            bot_role,
        }
    }

    pub async fn run(&self, job_id: &str, payload: JobPayload) -> BexResult<BexReport> {
        let started_at = Utc::now();
        let lag_ms = (started_at - payload.queued_at).num_milliseconds().max(0);

        if !self.bot_role.is_worker() {
            return Ok(BexReport::short_circuit(
                Outcome::SkippedNonWorker,
                true,
                payload.queued_at,
                started_at,
                lag_ms,
                None,
            ));
        }

        let campaign = self.load_campaign(&payload.campaign_id).await?;
        let campaign = match campaign {
            Some(c) if c.is_active => c,
            _ => {
                return Ok(BexReport::short_circuit(
                    Outcome::InactiveCampaign,
                    true,
                    payload.queued_at,
                    started_at,
                    lag_ms,
                    None,
                ))
            }
        };

        if payload.message != campaign.message {
            return Ok(BexReport::short_circuit(
                Outcome::StaleMessage,
                true,
                payload.queued_at,
                started_at,
                lag_ms,
                None,
            ));
        }
        if let Some(interval) = payload.interval_seconds {
            if interval > 0 && interval != campaign.interval_seconds {
                return Ok(BexReport::short_circuit(
                    Outcome::StaleInterval,
                    true,
                    payload.queued_at,
                    started_at,
                    lag_ms,
                    None,
                ));
            }
        }

        let lock_key = format!("broadcast:user-lock:{}", payload.user_id);
        let guard = match self.lock.acquire(&lock_key, self.config.user_lock_ttl_ms).await? {
            Some(guard) => guard,
            None => {
                return Ok(BexReport::short_circuit(
                    Outcome::LockBusy,
                    true,
                    payload.queued_at,
                    started_at,
                    lag_ms,
                    None,
                ))
            }
        };

        let result = self.run_locked(job_id, &payload, &campaign, started_at, lag_ms).await;

        if let Err(e) = self.lock.release(&guard).await {
            tracing::warn!(error = %e, "failed to release broadcast user lock");
        }

        result
    }

    async fn run_locked(
        &self,
        job_id: &str,
        payload: &JobPayload,
        campaign: &Campaign,
        started_at: DateTime<Utc>,
        lag_ms: i64,
    ) -> BexResult<BexReport> {
        let now = Utc::now();
        let cycle_seconds = campaign.interval_seconds.max(60) as i64 + self.config.interval_safety_seconds;

        self.roll_over_cycle(&payload.user_id, &campaign.id, cycle_seconds, now).await?;

        let accounts = self.available_accounts(&payload.user_id, now).await?;
        if accounts.is_empty() {
            return Ok(BexReport::short_circuit(
                Outcome::NoAccount,
                false,
                started_at,
                started_at,
                lag_ms,
                Some("no active account".to_string()),
            ));
        }

        let targets = self.active_targets(&payload.user_id).await?;
        if targets.is_empty() {
            return Ok(BexReport {
                success: true,
                count: 0,
                errors: Vec::new(),
                error: None,
                summary: Summary::default(),
                outcome: Outcome::Sent,
                scheduled_at: payload.queued_at,
                started_at,
                lag_ms,
                continuation_enqueued: None,
                continuation_delay_ms: None,
                continuation_reason: None,
            });
        }

        for account in &accounts {
            self.telegram.ensure_account(&account.id, &account.session_material);
        }

        self.recover_stuck_inflight(&payload.user_id, &campaign.id, now).await?;
        self.seed_attempts_if_needed(&payload.user_id, campaign, &accounts, &targets).await?;

        let sent_count = self
            .dispatch(&payload.user_id, &campaign.id, &campaign.message, &accounts, cycle_seconds)
            .await?;

        let summary = self.summarize(&payload.user_id, &campaign.id, now).await?;
        let outcome = decide_outcome(&summary);

        if sent_count > 0 {
            self.mark_run(&campaign.id, now).await?;
        }

        let (continuation_enqueued, continuation_delay_ms, continuation_reason) = self
            .maybe_continue(job_id, payload, campaign, &summary, outcome)
            .await?;

        Ok(BexReport {
            success: summary.failed == 0,
            count: sent_count,
            errors: Vec::new(),
            error: None,
            summary,
            outcome,
            scheduled_at: payload.queued_at,
            started_at,
            lag_ms,
            continuation_enqueued: Some(continuation_enqueued),
            continuation_delay_ms,
            continuation_reason,
        })
    }

    async fn load_campaign(&self, campaign_id: &str) -> BexResult<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(shared::Error::from)?;
        Ok(campaign)
    }

    async fn roll_over_cycle(
        &self,
        user_id: &str,
        campaign_id: &str,
        cycle_seconds: i64,
        now: DateTime<Utc>,
    ) -> BexResult<()> {
        let threshold = now - ChronoDuration::seconds(cycle_seconds);

        sqlx::query(
            r#"
            UPDATE broadcast_attempts
            SET status = 'pending', retry_count = 0, next_attempt_at = $1,
                started_at = NULL, sent_at = NULL, terminal_reason_code = NULL,
                last_error = NULL, updated_at = $1
            WHERE user_id = $2 AND campaign_id = $3 AND status = 'sent' AND sent_at <= $4
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(campaign_id)
        .bind(threshold)
        .execute(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        sqlx::query(
            r#"
            UPDATE broadcast_attempts
            SET status = 'pending', retry_count = 0, next_attempt_at = $1,
                started_at = NULL, terminal_reason_code = NULL,
                last_error = NULL, updated_at = $1
            WHERE user_id = $2 AND campaign_id = $3 AND status = 'failed-terminal' AND updated_at <= $4
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(campaign_id)
        .bind(threshold)
        .execute(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        Ok(())
    }

    async fn available_accounts(&self, user_id: &str, now: DateTime<Utc>) -> BexResult<Vec<TelegramAccount>> {
        let accounts = sqlx::query_as::<_, TelegramAccount>(
            "SELECT * FROM telegram_accounts WHERE user_id = $1 AND is_active = true",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        Ok(accounts.into_iter().filter(|a| a.is_available(now)).collect())
    }

    async fn active_targets(&self, user_id: &str) -> BexResult<Vec<TargetGroup>> {
        let targets = sqlx::query_as::<_, TargetGroup>(
            "SELECT * FROM target_groups WHERE user_id = $1 AND is_active = true ORDER BY group_id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(shared::Error::from)?;
        Ok(targets)
    }

    async fn recover_stuck_inflight(&self, user_id: &str, campaign_id: &str, now: DateTime<Utc>) -> BexResult<()> {
        let threshold = now - ChronoDuration::milliseconds(self.config.stuck_inflight_ms);
        let recovered = sqlx::query(
            r#"
            UPDATE broadcast_attempts
            SET status = 'pending', next_attempt_at = $1, last_error = 'Recovered stuck in-flight', updated_at = $1
            WHERE user_id = $2 AND campaign_id = $3 AND status = 'in-flight' AND started_at <= $4
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(campaign_id)
        .bind(threshold)
        .execute(&self.pool)
        .await
        .map_err(shared::Error::from)?
        .rows_affected();

        crate::metrics::set_stuck_inflight_ratio(recovered, self.config.stuck_inflight_threshold);
        Ok(())
    }

    async fn seed_attempts_if_needed(
        &self,
        user_id: &str,
        campaign: &Campaign,
        accounts: &[TelegramAccount],
        targets: &[TargetGroup],
    ) -> BexResult<()> {
        let counts = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) as count FROM broadcast_attempts WHERE user_id = $1 AND campaign_id = $2 GROUP BY status",
        )
        .bind(user_id)
        .bind(&campaign.id)
        .fetch_all(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        let total: i64 = counts.iter().map(|c| c.count).sum();
        let active: i64 = counts
            .iter()
            .filter(|c| c.status == "pending" || c.status == "in-flight")
            .map(|c| c.count)
            .sum();

        if total > 0 && active > 0 {
            return Ok(());
        }

        for (i, target) in targets.iter().enumerate() {
            let account = &accounts[i % accounts.len()];
            let idempotency_key = shared::models::BroadcastAttempt::idempotency_key(&campaign.id, &target.id);

            sqlx::query(
                r#"
                INSERT INTO broadcast_attempts
                    (id, user_id, campaign_id, target_group_id, idempotency_key,
                     assigned_account_id, sequence, status, retry_count, max_retries)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, $8)
                ON CONFLICT (idempotency_key) DO NOTHING
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(&campaign.id)
            .bind(&target.id)
            .bind(&idempotency_key)
            .bind(&account.id)
            .bind((i + 1) as i32)
            .bind(self.config.max_retries as i32)
            .execute(&self.pool)
            .await
            .map_err(shared::Error::from)?;
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        user_id: &str,
        campaign_id: &str,
        message: &str,
        accounts: &[TelegramAccount],
        cycle_seconds: i64,
    ) -> BexResult<i64> {
        let claimed = Arc::new(AtomicU32::new(0));
        let sent = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));
        let max_attempts = self.config.max_attempts_per_run;
        let mut lanes = Vec::new();

        for account in accounts {
            for _ in 0..self.config.per_account_concurrency {
                let account_id = account.id.clone();
                let user_id = user_id.to_string();
                let campaign_id = campaign_id.to_string();
                let message = message.to_string();
                let claimed = claimed.clone();
                let sent = sent.clone();
                let retries = retries.clone();

                lanes.push(self.run_lane(
                    user_id,
                    campaign_id,
                    message,
                    account_id,
                    cycle_seconds,
                    claimed,
                    sent,
                    retries,
                    max_attempts,
                ));
            }
        }

        crate::metrics::set_active_lanes(lanes.len());
        let lane_result = futures_util::future::try_join_all(lanes).await;
        crate::metrics::set_active_lanes(0);
        lane_result?;

        crate::metrics::set_retry_storm_ratio(retries.load(Ordering::SeqCst) as u64, self.config.retry_storm_threshold);

        Ok(sent.load(Ordering::SeqCst) as i64)
    }

    async fn run_lane(
        &self,
        user_id: String,
        campaign_id: String,
        message: String,
        account_id: String,
        cycle_seconds: i64,
        claimed: Arc<AtomicU32>,
        sent: Arc<AtomicU32>,
        retries: Arc<AtomicU32>,
        max_attempts: u32,
    ) -> BexResult<()> {
        loop {
            if claimed.load(Ordering::SeqCst) >= max_attempts {
                return Ok(());
            }

            let attempt_id = match self.claim_next_attempt(&user_id, &campaign_id, &account_id).await? {
                Some(id) => id,
                None => return Ok(()),
            };
            claimed.fetch_add(1, Ordering::SeqCst);
            crate::metrics::record_attempt_claimed();

            let attempt = match self.load_attempt(&attempt_id).await? {
                Some(a) => a,
                None => continue,
            };

            let target = self.load_target(&attempt.target_group_id).await?;
            let target = match target {
                Some(t) => t,
                None => {
                    self.terminalize(&attempt_id, "missing-target", "target group not found").await?;
                    continue;
                }
            };

            if let Some(sent_at) = attempt.sent_at {
                let elapsed = Utc::now() - sent_at;
                if elapsed < ChronoDuration::seconds(cycle_seconds) {
                    self.rollback_premature_send(&attempt_id, sent_at + ChronoDuration::seconds(cycle_seconds))
                        .await?;
                    continue;
                }
            }

            self.global_window.acquire().await;
            self.pacer.acquire(&account_id).await;

            match self.telegram.send(&account_id, &target.group_id, &message).await {
                Ok(()) => {
                    self.mark_sent(&attempt_id).await?;
                    sent.fetch_add(1, Ordering::SeqCst);
                    crate::metrics::record_job_outcome("attempt-sent");
                }
                Err(e) => {
                    self.handle_send_error(&account_id, &attempt_id, attempt.retry_count, e, &retries).await?;
                }
            }
        }
    }

    async fn claim_next_attempt(&self, user_id: &str, campaign_id: &str, account_id: &str) -> BexResult<Option<String>> {
        let candidate: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM broadcast_attempts
            WHERE user_id = $1 AND campaign_id = $2 AND assigned_account_id = $3
              AND status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= now())
            ORDER BY sequence ASC, created_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(campaign_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        let candidate = match candidate {
            Some(id) => id,
            None => return Ok(None),
        };

        let rows = sqlx::query(
            "UPDATE broadcast_attempts SET status = 'in-flight', started_at = now(), updated_at = now() WHERE id = $1 AND status = 'pending'",
        )
        .bind(&candidate)
        .execute(&self.pool)
        .await
        .map_err(shared::Error::from)?
        .rows_affected();

        if rows == 0 {
            return Ok(None);
        }

        Ok(Some(candidate))
    }

    async fn load_attempt(&self, attempt_id: &str) -> BexResult<Option<shared::models::BroadcastAttempt>> {
        let attempt = sqlx::query_as::<_, shared::models::BroadcastAttempt>(
            "SELECT * FROM broadcast_attempts WHERE id = $1",
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(shared::Error::from)?;
        Ok(attempt)
    }

    async fn load_target(&self, target_id: &str) -> BexResult<Option<TargetGroup>> {
        let target = sqlx::query_as::<_, TargetGroup>("SELECT * FROM target_groups WHERE id = $1")
            .bind(target_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(shared::Error::from)?;
        Ok(target)
    }

    async fn mark_sent(&self, attempt_id: &str) -> BexResult<()> {
        sqlx::query(
            "UPDATE broadcast_attempts SET status = 'sent', sent_at = now(), last_error = NULL, terminal_reason_code = NULL, updated_at = now() WHERE id = $1 AND status = 'in-flight'",
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await
        .map_err(shared::Error::from)?;
        Ok(())
    }

    async fn terminalize(&self, attempt_id: &str, terminal_code: &str, message: &str) -> BexResult<()> {
        sqlx::query(
            "UPDATE broadcast_attempts SET status = 'failed-terminal', terminal_reason_code = $2, last_error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(attempt_id)
        .bind(terminal_code)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(shared::Error::from)?;
        Ok(())
    }

    async fn rollback_premature_send(&self, attempt_id: &str, next_attempt_at: DateTime<Utc>) -> BexResult<()> {
        sqlx::query(
            "UPDATE broadcast_attempts SET status = 'pending', next_attempt_at = $2, updated_at = now() WHERE id = $1",
        )
        .bind(attempt_id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(shared::Error::from)?;
        Ok(())
    }

    async fn handle_send_error(
        &self,
        account_id: &str,
        attempt_id: &str,
        retry_count: i32,
        error: BexError,
        retries: &AtomicU32,
    ) -> BexResult<()> {
        let message = error.safe_message();
        let classification = classify(&message, None);
        let next_retry_count = retry_count + 1;
        crate::metrics::record_retry(&classification.terminal_code);

        if classification.retriable && (next_retry_count as u32) <= self.config.max_retries {
            retries.fetch_add(1, Ordering::SeqCst);
            let delay_ms = compute_retry_delay_ms(
                retry_count as u32,
                classification.retry_after_seconds,
                self.config.retry_base_ms,
                self.config.retry_max_ms,
                self.config.retry_jitter_ratio,
            );
            let next_attempt_at = Utc::now() + ChronoDuration::milliseconds(delay_ms as i64);

            sqlx::query(
                r#"
                UPDATE broadcast_attempts
                SET status = 'pending', retry_count = $2, next_attempt_at = $3,
                    last_error = $4, terminal_reason_code = 'retriable-rate-limit', updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(attempt_id)
            .bind(next_retry_count)
            .bind(next_attempt_at)
            .bind(&message)
            .execute(&self.pool)
            .await
            .map_err(shared::Error::from)?;

            if let Some(secs) = classification.retry_after_seconds {
                let flood_wait_until = Utc::now() + ChronoDuration::seconds(secs as i64);
                sqlx::query(
                    "UPDATE telegram_accounts SET is_flood_wait = true, flood_wait_until = $2, updated_at = now() WHERE id = $1",
                )
                .bind(account_id)
                .bind(flood_wait_until)
                .execute(&self.pool)
                .await
                .map_err(shared::Error::from)?;
            }
        } else {
            let terminal_code = if classification.retriable {
                "retry-exhausted"
            } else {
                &classification.terminal_code
            };

            sqlx::query(
                r#"
                UPDATE broadcast_attempts
                SET status = 'failed-terminal', retry_count = $2, terminal_reason_code = $3,
                    last_error = $4, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(attempt_id)
            .bind(next_retry_count)
            .bind(terminal_code)
            .bind(&message)
            .execute(&self.pool)
            .await
            .map_err(shared::Error::from)?;
        }

        Ok(())
    }

    async fn summarize(&self, user_id: &str, campaign_id: &str, now: DateTime<Utc>) -> BexResult<Summary> {
        let counts = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) as count FROM broadcast_attempts WHERE user_id = $1 AND campaign_id = $2 GROUP BY status",
        )
        .bind(user_id)
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        let count_for = |status: &str| counts.iter().find(|c| c.status == status).map(|c| c.count).unwrap_or(0);

        let next_due_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(next_attempt_at) FROM broadcast_attempts WHERE user_id = $1 AND campaign_id = $2 AND status = 'pending' AND next_attempt_at > $3",
        )
        .bind(user_id)
        .bind(campaign_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        let ready_pending_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM broadcast_attempts WHERE user_id = $1 AND campaign_id = $2 AND status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= $3)",
        )
        .bind(user_id)
        .bind(campaign_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        let provider_constrained_delay: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM broadcast_attempts WHERE user_id = $1 AND campaign_id = $2 AND status = 'pending' AND terminal_reason_code = 'retriable-rate-limit')",
        )
        .bind(user_id)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await
        .map_err(shared::Error::from)?;

        let next_due_in_ms = next_due_at
            .map(|d| (d - now).num_milliseconds().max(0))
            .unwrap_or(0);

        Ok(Summary {
            sent: count_for("sent"),
            failed: count_for("failed-terminal"),
            pending: count_for("pending"),
            in_flight: count_for("in-flight"),
            next_due_in_ms,
            ready_pending_count,
            provider_constrained_delay,
        })
    }

    async fn mark_run(&self, campaign_id: &str, now: DateTime<Utc>) -> BexResult<()> {
        sqlx::query("UPDATE campaigns SET last_run_at = $1, updated_at = now() WHERE id = $2")
            .bind(now)
            .bind(campaign_id)
            .execute(&self.pool)
            .await
            .map_err(shared::Error::from)?;
        Ok(())
    }

    async fn maybe_continue(
        &self,
        _job_id: &str,
        payload: &JobPayload,
        campaign: &Campaign,
        summary: &Summary,
        outcome: Outcome,
    ) -> BexResult<(bool, Option<u64>, Option<ContinuationReason>)> {
        let should_continue = matches!(outcome, Outcome::Deferred | Outcome::ProviderConstrainedDelay) && summary.failed == 0;
        if !should_continue {
            return Ok((false, None, None));
        }

        let (delay_ms, reason) = {
            let mut rng = rand::thread_rng();
            if summary.ready_pending_count > 0 {
                let jitter = if self.config.continuation_jitter_ms > 0 {
                    rng.gen_range(0..=self.config.continuation_jitter_ms)
                } else {
                    0
                };
                (self.config.continuation_base_ms + jitter, ContinuationReason::ReadyPendingFast)
            } else if summary.next_due_in_ms > 0 {
                (summary.next_due_in_ms as u64, ContinuationReason::ExactNextDue)
            } else {
                let jitter = if self.config.continuation_jitter_ms > 0 {
                    rng.gen_range(0..=self.config.continuation_jitter_ms)
                } else {
                    0
                };
                (self.config.continuation_base_ms + jitter, ContinuationReason::DefaultDeferred)
            }
        };

        let job_id = format!("cont-{}-{}", campaign.id, payload.user_id);
        let continuation_payload = JobPayload {
            user_id: payload.user_id.clone(),
            message: campaign.message.clone(),
            campaign_id: campaign.id.clone(),
            queued_at: Utc::now(),
            interval_seconds: None,
        };

        let enqueued = self
            .queue
            .enqueue(&job_id, &continuation_payload, delay_ms)
            .await
            .map_err(shared::Error::from)?;

        Ok((enqueued, Some(delay_ms), Some(reason)))
    }
}

fn decide_outcome(summary: &Summary) -> Outcome {
    if summary.failed > 0 && summary.sent == 0 {
        Outcome::Failed
    } else if summary.provider_constrained_delay && summary.ready_pending_count == 0 {
        Outcome::ProviderConstrainedDelay
    } else if summary.pending > 0 || summary.in_flight > 0 {
        Outcome::Deferred
    } else {
        Outcome::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_prefers_failed_when_nothing_sent() {
        let summary = Summary {
            sent: 0,
            failed: 2,
            pending: 0,
            in_flight: 0,
            next_due_in_ms: 0,
            ready_pending_count: 0,
            provider_constrained_delay: false,
        };
        assert_eq!(decide_outcome(&summary), Outcome::Failed);
    }

    #[test]
    fn outcome_is_provider_constrained_when_nothing_ready() {
        let summary = Summary {
            sent: 1,
            failed: 0,
            pending: 1,
            in_flight: 0,
            next_due_in_ms: 300_000,
            ready_pending_count: 0,
            provider_constrained_delay: true,
        };
        assert_eq!(decide_outcome(&summary), Outcome::ProviderConstrainedDelay);
    }

    #[test]
    fn outcome_is_deferred_when_work_remains() {
        let summary = Summary {
            sent: 1,
            failed: 0,
            pending: 1,
            in_flight: 0,
            next_due_in_ms: 0,
            ready_pending_count: 1,
            provider_constrained_delay: false,
        };
        assert_eq!(decide_outcome(&summary), Outcome::Deferred);
    }

    #[test]
    fn outcome_is_sent_when_everything_settled() {
        let summary = Summary {
            sent: 2,
            failed: 0,
            pending: 0,
            in_flight: 0,
            next_due_in_ms: 0,
            ready_pending_count: 0,
            provider_constrained_delay: false,
        };
        assert_eq!(decide_outcome(&summary), Outcome::Sent);
    }
}

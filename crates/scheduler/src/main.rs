//! Scheduler binary for the broadcast platform.
//!
//! Runs the SCH tick loop: elects a single leader across the cluster and
//! emits deferred jobs for campaigns whose interval has elapsed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use shared::redis::{create_client, DistributedLock, RedisJobQueue};
use shared::{db, Config};
use tokio::signal;

use scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing();
    scheduler::metrics::install_recorder();

    tracing::info!("starting scheduler");

    let config = Config::from_env().context("failed to load configuration")?;

    let db_pool = db::create_pool(&config.database)
        .await
        .context("failed to create database pool")?;
    db::run_migrations(&db_pool)
        .await
        .context("failed to run database migrations")?;
    db::check_health(&db_pool)
        .await
        .context("database health check failed")?;

    let redis_conn = create_client(&config.redis.url)
        .await
        .context("failed to connect to redis")?;
    tracing::info!("connected to redis");

    let lock = DistributedLock::new(redis_conn.clone());
    let queue = Arc::new(RedisJobQueue::new(redis_conn, "broadcast"));
    let scheduler = Scheduler::new(db_pool, lock, queue, config.scheduler.clone());

    let tick_period = Duration::from_secs(config.scheduler.tick_secs);
    let tick_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        loop {
            interval.tick().await;
            match scheduler.run_tick().await {
                Ok(report) if report.won_leadership => {
                    scheduler::metrics::record_tick(report.considered, report.enqueued);
                    tracing::info!(
                        considered = report.considered,
                        enqueued = report.enqueued,
                        "scheduler tick complete"
                    );
                }
                Ok(_) => {
                    tracing::debug!("scheduler tick skipped, another instance holds leadership");
                }
                Err(e) => {
                    tracing::error!(error = %e, "scheduler tick failed");
                }
            }
        }
    });

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received, stopping scheduler");
        }
        result = tick_loop => {
            match result {
                Ok(()) => tracing::warn!("tick loop exited cleanly (unexpected)"),
                Err(e) => {
                    tracing::error!("tick loop panicked: {}", e);
                    anyhow::bail!("scheduler tick loop panicked: {}", e);
                }
            }
        }
    }

    Ok(())
}

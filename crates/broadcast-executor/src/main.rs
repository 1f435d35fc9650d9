//! Broadcast Executor binary for the broadcast platform.
//!
//! Runs the BEX dispatch loop: consumes due jobs from the coordination
//! store's queue, advances each campaign's delivery cycle under a per-user
//! lock, and may re-enqueue a continuation job for the campaign's remaining
//! work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use shared::redis::{create_client, DistributedLock, JobQueue, RedisJobQueue};
use shared::{db, Config};
use tokio::signal;

mod classify;
mod dispatcher;
mod error;
mod executor;
mod metrics;
mod rate_governor;
mod result;
mod telegram;

use dispatcher::Dispatcher;
use executor::Executor;
use telegram::{TelegramClient, TelegramClientPool};

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing();

    tracing::info!("starting broadcast executor");

    let config = Config::from_env().context("failed to load configuration")?;

    metrics::install_recorder();

    let db_pool = db::create_pool(&config.database)
        .await
        .context("failed to create database pool")?;
    db::check_health(&db_pool)
        .await
        .context("database health check failed")?;

    let redis_conn = create_client(&config.redis.url)
        .await
        .context("failed to connect to redis")?;
    tracing::info!("connected to redis");

    let lock = DistributedLock::new(redis_conn.clone());
    let queue = Arc::new(RedisJobQueue::new(redis_conn, "broadcast"));
    let telegram = Arc::new(TelegramClientPool::new(config.telegram.clone()));

    let executor = Arc::new(Executor::new(
        db_pool,
        lock,
        queue.clone(),
        telegram.clone(),
        config.broadcast.clone(),
        config.telegram.global_mps,
        config.bot_role,
    ));

    let concurrency = config.broadcast.concurrency;
    let dispatcher = Dispatcher::new(executor, queue.clone(), concurrency);
    let poll_period = Duration::from_millis(500);

    let dispatch_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_period);
        loop {
            interval.tick().await;
            match dispatcher.run_once().await {
                Ok(report) if report.dequeued > 0 => {
                    tracing::info!(
                        dequeued = report.dequeued,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "broadcast dispatch batch complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e.safe_message(), "broadcast dispatch batch failed"),
            }
            metrics::set_queue_depth(queue.depth().await.unwrap_or(0));
        }
    });

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received, stopping broadcast executor");
        }
        result = dispatch_loop => {
            match result {
                Ok(()) => tracing::warn!("dispatch loop exited cleanly (unexpected)"),
                Err(e) => {
                    tracing::error!("dispatch loop panicked: {}", e);
                    anyhow::bail!("broadcast dispatch loop panicked: {}", e);
                }
            }
        }
    }

    telegram.shutdown().await;

    Ok(())
}

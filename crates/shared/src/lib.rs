//! Shared library for the broadcast platform's scheduler and executor binaries.
//!
//! This crate provides common functionality used across both services:
//! - Database connection pooling and the persistent-store domain model
//! - The Redis-backed coordination store (distributed lock + job queue)
//! - Error handling types
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod redis;

pub use config::Config;
pub use db::DbPool;
pub use error::{Error, Result};
pub use redis::{DistributedLock, InMemoryJobQueue, JobPayload, JobQueue, RedisJobQueue};

/// Initialize tracing subscriber for structured logging.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shared=debug,scheduler=debug,broadcast_executor=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

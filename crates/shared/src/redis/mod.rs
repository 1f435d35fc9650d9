//! Redis-backed coordination primitives (the Coordination Store).
//!
//! This module provides:
//! - connection creation
//! - a distributed lock (leader election, per-user mutual exclusion)
//! - a deferred, deduplicated job queue

pub mod lock;
pub mod queue;

pub use lock::DistributedLock;
pub use queue::{InMemoryJobQueue, JobPayload, JobQueue, RedisJobQueue};

use redis::{aio::ConnectionManager, Client};

use crate::error::{Error, Result};

/// Create a Redis client and connection manager from a connection URL.
pub async fn create_client(url: &str) -> Result<ConnectionManager> {
    let client = Client::open(url).map_err(|e| Error::config(format!("Invalid Redis URL: {}", e)))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| Error::internal(format!("Failed to connect to Redis: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_redis_url() {
        let result = create_client("invalid://url").await;
        assert!(result.is_err());
    }
}

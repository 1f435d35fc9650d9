//! The deferred, deduplicated job queue backing the Coordination Store.
//!
//! Jobs live in a Redis sorted set scored by their due timestamp (ms since
//! epoch). A separate dedup key per `job_id` prevents a second enqueue of a
//! job already queued or running; the Lua script below makes "is it new" and
//! "reserve it" atomic so two racing enqueuers can't both believe they won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Script};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::error::Result;

/// The job payload carried through the queue, matching the documented wire
/// shape exactly (camelCase on the wire, snake_case in Rust).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobPayload {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub message: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    #[serde(rename = "queuedAt")]
    pub queued_at: DateTime<Utc>,
    #[serde(rename = "intervalSeconds", skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i32>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues `payload` under `job_id`, due `defer_ms` from now. Returns
    /// `false` without enqueuing if `job_id` is already queued or running.
    async fn enqueue(&self, job_id: &str, payload: &JobPayload, defer_ms: u64) -> Result<bool>;

    /// Pops up to `max` jobs whose due time has elapsed, in due-time order.
    async fn dequeue_due(&self, max: usize) -> Result<Vec<(String, JobPayload)>>;

    /// Releases the dedup guard for `job_id` once its handler has returned,
    /// whether it succeeded or failed.
    async fn complete(&self, job_id: &str) -> Result<()>;

    /// Approximate number of jobs still waiting (for metrics).
    async fn depth(&self) -> Result<u64>;
}

const ENQUEUE_SCRIPT: &str = r#"
local seen_key = KEYS[1]
local zset_key = KEYS[2]
local hash_key = KEYS[3]
local job_id = ARGV[1]
local due_at_ms = ARGV[2]
local payload = ARGV[3]
local guard_ttl_secs = ARGV[4]

if redis.call('EXISTS', seen_key) == 1 then
    return 0
end

redis.call('SET', seen_key, '1', 'EX', guard_ttl_secs)
redis.call('ZADD', zset_key, due_at_ms, job_id)
redis.call('HSET', hash_key, job_id, payload)
return 1
"#;

const DEQUEUE_SCRIPT: &str = r#"
local zset_key = KEYS[1]
local hash_key = KEYS[2]
local now_ms = ARGV[1]
local max = tonumber(ARGV[2])

local due = redis.call('ZRANGEBYSCORE', zset_key, '-inf', now_ms, 'LIMIT', 0, max)
local out = {}
for i, job_id in ipairs(due) do
    local payload = redis.call('HGET', hash_key, job_id)
    if payload then
        redis.call('ZREM', zset_key, job_id)
        redis.call('HDEL', hash_key, job_id)
        table.insert(out, job_id)
        table.insert(out, payload)
    else
        redis.call('ZREM', zset_key, job_id)
    end
end
return out
"#;

/// How long the dedup guard survives after a job completes without being
/// explicitly released; bounds the damage from a worker that crashes and
/// never calls `complete`.
const GUARD_TTL_SECS: u64 = 3600;

pub struct RedisJobQueue {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    fn seen_key(&self, job_id: &str) -> String {
        format!("{}:jobs:seen:{}", self.namespace, job_id)
    }

    fn zset_key(&self) -> String {
        format!("{}:jobs:due", self.namespace)
    }

    fn hash_key(&self) -> String {
        format!("{}:jobs:payloads", self.namespace)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job_id: &str, payload: &JobPayload, defer_ms: u64) -> Result<bool> {
        let due_at_ms = Utc::now().timestamp_millis() as u64 + defer_ms;
        let body = serde_json::to_string(payload)
            .map_err(|e| crate::error::Error::internal(format!("job payload encode failed: {e}")))?;

        let mut conn = self.conn.clone();
        let script = Script::new(ENQUEUE_SCRIPT);
        let accepted: i64 = script
            .key(self.seen_key(job_id))
            .key(self.zset_key())
            .key(self.hash_key())
            .arg(job_id)
            .arg(due_at_ms)
            .arg(body)
            .arg(GUARD_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;

        Ok(accepted == 1)
    }

    async fn dequeue_due(&self, max: usize) -> Result<Vec<(String, JobPayload)>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let script = Script::new(DEQUEUE_SCRIPT);
        let flat: Vec<String> = script
            .key(self.zset_key())
            .key(self.hash_key())
            .arg(now_ms)
            .arg(max)
            .invoke_async(&mut conn)
            .await?;

        let mut out = Vec::with_capacity(flat.len() / 2);
        for pair in flat.chunks_exact(2) {
            let job_id = pair[0].clone();
            match serde_json::from_str::<JobPayload>(&pair[1]) {
                Ok(payload) => out.push((job_id, payload)),
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "dropping undecodable job payload"),
            }
        }
        Ok(out)
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.seen_key(job_id))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCARD")
            .arg(self.zset_key())
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// In-memory job queue used by scheduler/executor unit tests.
#[derive(Default)]
pub struct InMemoryJobQueue {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    seen: HashSet<String>,
    due: BTreeMap<i64, Vec<(String, JobPayload)>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: &str, payload: &JobPayload, defer_ms: u64) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        if state.seen.contains(job_id) {
            return Ok(false);
        }
        state.seen.insert(job_id.to_string());
        let due_at_ms = Utc::now().timestamp_millis() + defer_ms as i64;
        state
            .due
            .entry(due_at_ms)
            .or_default()
            .push((job_id.to_string(), payload.clone()));
        Ok(true)
    }

    async fn dequeue_due(&self, max: usize) -> Result<Vec<(String, JobPayload)>> {
        let mut state = self.inner.lock().unwrap();
        let now_ms = Utc::now().timestamp_millis();
        let mut out = Vec::new();
        let ready_keys: Vec<i64> = state.due.range(..=now_ms).map(|(k, _)| *k).collect();
        'outer: for key in ready_keys {
            if let Some(bucket) = state.due.get_mut(&key) {
                while let Some(item) = bucket.first().cloned() {
                    if out.len() >= max {
                        break 'outer;
                    }
                    bucket.remove(0);
                    out.push(item);
                }
            }
            if state.due.get(&key).map(|b| b.is_empty()).unwrap_or(false) {
                state.due.remove(&key);
            }
        }
        Ok(out)
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        self.inner.lock().unwrap().seen.remove(job_id);
        Ok(())
    }

    async fn depth(&self) -> Result<u64> {
        let state = self.inner.lock().unwrap();
        Ok(state.due.values().map(|b| b.len() as u64).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> JobPayload {
        JobPayload {
            user_id: "u1".into(),
            message: "hello".into(),
            campaign_id: "c1".into(),
            queued_at: Utc::now(),
            interval_seconds: Some(60),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_job_id() {
        let q = InMemoryJobQueue::new();
        assert!(q.enqueue("sched-c1-u1-5", &payload(), 0).await.unwrap());
        assert!(!q.enqueue("sched-c1-u1-5", &payload(), 0).await.unwrap());
    }

    #[tokio::test]
    async fn dequeues_only_due_jobs() {
        let q = InMemoryJobQueue::new();
        q.enqueue("now-job", &payload(), 0).await.unwrap();
        q.enqueue("future-job", &payload(), 60_000).await.unwrap();

        let due = q.dequeue_due(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "now-job");
    }

    #[tokio::test]
    async fn completing_a_job_allows_re_enqueue() {
        let q = InMemoryJobQueue::new();
        q.enqueue("cont-c1-u1", &payload(), 0).await.unwrap();
        q.dequeue_due(10).await.unwrap();
        assert!(!q.enqueue("cont-c1-u1", &payload(), 0).await.unwrap());
        q.complete("cont-c1-u1").await.unwrap();
        assert!(q.enqueue("cont-c1-u1", &payload(), 0).await.unwrap());
    }

    #[test]
    fn job_payload_serializes_with_camel_case_keys() {
        let json = serde_json::to_string(&payload()).unwrap();
        assert!(json.contains("\"userId\""));
        assert!(json.contains("\"campaignId\""));
        assert!(json.contains("\"queuedAt\""));
    }
}

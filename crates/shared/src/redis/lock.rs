//! Distributed lock used for scheduler leader election and per-user mutual
//! exclusion in the broadcast executor.
//!
//! Acquisition is a plain `SET key token NX PX ttl`. Release is a
//! compare-and-delete Lua script so a lock holder can never clear a lock it
//! no longer owns (e.g. after its own TTL already expired and someone else
//! acquired it).

use rand::Rng;
use redis::{aio::ConnectionManager, Script};

use crate::error::Result;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct DistributedLock {
    conn: ConnectionManager,
}

/// A held lock. Dropping this without calling `release` leaves the key to
/// expire on its own TTL; callers should always explicitly release.
pub struct LockGuard {
    pub key: String,
    pub token: String,
}

impl DistributedLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn random_token() -> String {
        let mut rng = rand::thread_rng();
        let suffix: u64 = rng.gen();
        format!("{:x}", suffix)
    }

    /// Attempts to acquire `key` for `ttl_ms`. Returns `None` if someone else
    /// already holds it.
    pub async fn acquire(&self, key: &str, ttl_ms: u64) -> Result<Option<LockGuard>> {
        let token = Self::random_token();
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| LockGuard {
            key: key.to_string(),
            token,
        }))
    }

    /// Releases `guard` only if it is still the current holder of the key.
    pub async fn release(&self, guard: &LockGuard) -> Result<bool> {
        let mut conn = self.conn.clone();
        let script = Script::new(RELEASE_SCRIPT);
        let deleted: i64 = script
            .key(&guard.key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}

/// In-memory stand-in for tests that don't need a live Redis.
#[derive(Default)]
pub struct InMemoryLock {
    held: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, key: &str, token: &str) -> bool {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(key) {
            return false;
        }
        held.insert(key.to_string(), token.to_string());
        true
    }

    pub fn release(&self, key: &str, token: &str) -> bool {
        let mut held = self.held.lock().unwrap();
        match held.get(key) {
            Some(t) if t == token => {
                held.remove(key);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_lock_is_exclusive() {
        let lock = InMemoryLock::new();
        assert!(lock.acquire("user-lock:1", "token-a"));
        assert!(!lock.acquire("user-lock:1", "token-b"));
    }

    #[test]
    fn in_memory_lock_release_requires_matching_token() {
        let lock = InMemoryLock::new();
        lock.acquire("k", "token-a");
        assert!(!lock.release("k", "wrong-token"));
        assert!(lock.release("k", "token-a"));
        assert!(lock.acquire("k", "token-c"));
    }
}

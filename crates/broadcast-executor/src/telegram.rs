//! Telegram Client Pool (TCP): one warmed client per `account_id`.
//!
//! `session_material` is handed to the pool as an opaque, bot-token-shaped
//! credential — the pool never inspects its internal structure, which keeps
//! every account on the same Bot API transport the rest of the stack uses.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{BexError, BexResult};
use shared::config::TelegramConfig;

#[derive(Debug, Clone)]
pub struct TargetGroupInfo {
    pub group_id: String,
    pub title: String,
    pub kind: String,
}

/// The send + discovery surface BEX and (indirectly, through the excluded UI
/// collaborator) the rest of the stack drive this component through.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    async fn send(&self, account_id: &str, chat_id: &str, text: &str) -> BexResult<()>;
    async fn list_group_dialogs(&self, account_id: &str) -> BexResult<Vec<TargetGroupInfo>>;
    async fn shutdown(&self);

    /// Registers an account's credential ahead of its first send. Doubles
    /// used in tests have nothing to warm, so this defaults to a no-op.
    fn ensure_account(&self, _account_id: &str, _session_material: &str) {}
}

#[derive(Default)]
struct RemoteGroupsCache {
    cached_at: Option<DateTime<Utc>>,
    groups: Vec<TargetGroupInfo>,
    last_fetch_attempt: Option<DateTime<Utc>>,
    last_fetch_failure: Option<DateTime<Utc>>,
}

/// Warmed Bot API clients keyed by account id, plus the remote-groups cache
/// used by the (externally provided) UI collaborator.
pub struct TelegramClientPool {
    bots: DashMap<String, Bot>,
    peer_cache_warmed: DashMap<String, ()>,
    known_chats: DashMap<String, Vec<TargetGroupInfo>>,
    remote_groups: DashMap<String, Arc<AsyncMutex<RemoteGroupsCache>>>,
    config: TelegramConfig,
}

impl TelegramClientPool {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bots: DashMap::new(),
            peer_cache_warmed: DashMap::new(),
            known_chats: DashMap::new(),
            remote_groups: DashMap::new(),
            config,
        }
    }

    /// Registers `account_id`'s credential and warms its client on first use.
    fn client_for(&self, account_id: &str, session_material: &str) -> Bot {
        if let Some(bot) = self.bots.get(account_id) {
            return bot.clone();
        }
        let bot = Bot::new(session_material);
        self.bots.insert(account_id.to_string(), bot.clone());
        bot
    }

    async fn warm_peer_cache(&self, account_id: &str, bot: &Bot) {
        if self.peer_cache_warmed.contains_key(account_id) {
            return;
        }
        if let Err(e) = bot.get_me().await {
            tracing::warn!(account_id, error = %e, "failed to warm telegram peer cache");
            return;
        }
        self.peer_cache_warmed.insert(account_id.to_string(), ());
    }

    fn remote_groups_state(&self, account_id: &str) -> Arc<AsyncMutex<RemoteGroupsCache>> {
        self.remote_groups
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(RemoteGroupsCache::default())))
            .clone()
    }

    /// Records a successfully delivered chat so `list_group_dialogs` can
    /// surface it later.
    pub fn remember_chat(&self, account_id: &str, chat_id: &str) {
        let mut chats = self.known_chats.entry(account_id.to_string()).or_default();
        if !chats.iter().any(|g| g.group_id == chat_id) {
            chats.push(TargetGroupInfo {
                group_id: chat_id.to_string(),
                title: String::new(),
                kind: "group".to_string(),
            });
        }
    }
}

#[async_trait]
impl TelegramClient for TelegramClientPool {
    async fn send(&self, account_id: &str, chat_id: &str, text: &str) -> BexResult<()> {
        let bot = self
            .bots
            .get(account_id)
            .map(|b| b.clone())
            .ok_or_else(|| BexError::internal(format!("no warmed client for account {account_id}")))?;

        self.warm_peer_cache(account_id, &bot).await;

        let chat_id_num: i64 = chat_id
            .parse()
            .map_err(|_| BexError::internal(format!("invalid chat id: {chat_id}")))?;

        bot.send_message(ChatId(chat_id_num), text)
            .await
            .map_err(|e| BexError::telegram(e.to_string()))?;

        self.remember_chat(account_id, chat_id);
        Ok(())
    }

    async fn list_group_dialogs(&self, account_id: &str) -> BexResult<Vec<TargetGroupInfo>> {
        let state = self.remote_groups_state(account_id);
        let mut guard = state.lock().await;

        let now = Utc::now();
        if let Some(cached_at) = guard.cached_at {
            let age_ms = (now - cached_at).num_milliseconds().max(0) as u64;
            if age_ms < self.config.remote_groups_cache_ttl_ms {
                return Ok(guard.groups.clone());
            }
        }
        if let Some(last_attempt) = guard.last_fetch_attempt {
            let since_ms = (now - last_attempt).num_milliseconds().max(0) as u64;
            if since_ms < self.config.remote_groups_min_refresh_ms && guard.cached_at.is_some() {
                return Ok(guard.groups.clone());
            }
        }
        if let Some(last_failure) = guard.last_fetch_failure {
            let since_ms = (now - last_failure).num_milliseconds().max(0) as u64;
            if since_ms < self.config.remote_groups_failure_cooldown_ms {
                return Ok(guard.groups.clone());
            }
        }

        guard.last_fetch_attempt = Some(now);

        // The Bot API has no dialog-listing endpoint; dialogs are inferred
        // from chats we have actually delivered into.
        let fresh = self
            .known_chats
            .get(account_id)
            .map(|v| v.clone())
            .unwrap_or_default();

        guard.groups = fresh.clone();
        guard.cached_at = Some(now);
        guard.last_fetch_failure = None;

        Ok(fresh)
    }

    async fn shutdown(&self) {
        self.bots.clear();
        self.peer_cache_warmed.clear();
        tracing::info!("telegram client pool shut down");
    }

    fn ensure_account(&self, account_id: &str, session_material: &str) {
        self.client_for(account_id, session_material);
    }
}

/// In-memory double used by executor tests.
#[derive(Default)]
pub struct MockTelegramClient {
    pub sent: std::sync::Mutex<Vec<(String, String, String)>>,
    pub failures: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl MockTelegramClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, chat_id: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), error.to_string());
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl TelegramClient for MockTelegramClient {
    async fn send(&self, account_id: &str, chat_id: &str, text: &str) -> BexResult<()> {
        if let Some(err) = self.failures.lock().unwrap().remove(chat_id) {
            return Err(BexError::telegram(err));
        }
        self.sent
            .lock()
            .unwrap()
            .push((account_id.to_string(), chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn list_group_dialogs(&self, _account_id: &str) -> BexResult<Vec<TargetGroupInfo>> {
        Ok(Vec::new())
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_records_sends() {
        let client = MockTelegramClient::new();
        client.send("acct-1", "-100123", "hello").await.unwrap();
        assert_eq!(client.sent_count(), 1);
    }

    #[tokio::test]
    async fn mock_client_fails_once_then_succeeds() {
        let client = MockTelegramClient::new();
        client.fail_next("-100123", "FLOOD_WAIT_5");

        let err = client.send("acct-1", "-100123", "hi").await.unwrap_err();
        assert!(!err.safe_message().contains("no active"));

        client.send("acct-1", "-100123", "hi again").await.unwrap();
        assert_eq!(client.sent_count(), 1);
    }

    #[test]
    fn remember_chat_deduplicates() {
        let pool = TelegramClientPool::new(TelegramConfig {
            global_mps: 125,
            slowmode_default_seconds: 300,
            remote_groups_cache_ttl_ms: 60_000,
            remote_groups_min_refresh_ms: 180_000,
            remote_groups_failure_cooldown_ms: 120_000,
        });
        pool.remember_chat("acct-1", "-100123");
        pool.remember_chat("acct-1", "-100123");
        assert_eq!(pool.known_chats.get("acct-1").unwrap().len(), 1);
    }
}

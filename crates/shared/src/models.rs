//! Domain model shared by the scheduler and broadcast executor.
//!
//! These map directly onto the `campaigns`, `telegram_accounts`, `target_groups`
//! and `broadcast_attempts` tables created by the migrations in this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user-owned broadcast campaign.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub interval_seconds: i32,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A userbot credential available to deliver messages for a user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TelegramAccount {
    pub id: String,
    pub user_id: String,
    pub phone_number: String,
    pub session_material: String,
    pub is_active: bool,
    pub is_flood_wait: bool,
    pub flood_wait_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TelegramAccount {
    /// An account is available iff active and not presently in a flood-wait window.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if !self.is_flood_wait {
            return true;
        }
        match self.flood_wait_until {
            Some(until) => until <= now,
            None => true,
        }
    }
}

/// The kind of chat a target group refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetGroupKind {
    Group,
    Supergroup,
}

impl std::fmt::Display for TargetGroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetGroupKind::Group => write!(f, "group"),
            TargetGroupKind::Supergroup => write!(f, "supergroup"),
        }
    }
}

impl std::str::FromStr for TargetGroupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(TargetGroupKind::Group),
            "supergroup" => Ok(TargetGroupKind::Supergroup),
            other => Err(format!("unknown target group kind: {other}")),
        }
    }
}

/// A chat that a campaign delivers into, identified by `(user_id, group_id)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TargetGroup {
    pub id: String,
    pub user_id: String,
    pub group_id: String,
    pub title: String,
    pub kind: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Normalizes a supergroup chat id to the canonical `-100<digits>` form. Plain
/// group ids pass through unchanged.
pub fn normalize_group_id(raw: &str, kind: TargetGroupKind) -> String {
    if kind != TargetGroupKind::Supergroup {
        return raw.to_string();
    }
    if raw.starts_with("-100") {
        return raw.to_string();
    }
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return raw.to_string();
    }
    format!("-100{digits}")
}

/// Status of a single `(campaign, target_group)` delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    Pending,
    InFlight,
    Sent,
    FailedTerminal,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptStatus::Pending => write!(f, "pending"),
            AttemptStatus::InFlight => write!(f, "in-flight"),
            AttemptStatus::Sent => write!(f, "sent"),
            AttemptStatus::FailedTerminal => write!(f, "failed-terminal"),
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "in-flight" => Ok(AttemptStatus::InFlight),
            "sent" => Ok(AttemptStatus::Sent),
            "failed-terminal" => Ok(AttemptStatus::FailedTerminal),
            other => Err(format!("unknown attempt status: {other}")),
        }
    }
}

/// The durable record of one `(campaign, target_group)` pair's current state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BroadcastAttempt {
    pub id: String,
    pub user_id: String,
    pub campaign_id: String,
    pub target_group_id: String,
    pub idempotency_key: String,
    pub assigned_account_id: Option<String>,
    pub sequence: i32,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub terminal_reason_code: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BroadcastAttempt {
    pub fn idempotency_key(campaign_id: &str, target_group_id: &str) -> String {
        format!("{campaign_id}:{target_group_id}")
    }

    pub fn status(&self) -> AttemptStatus {
        self.status.parse().expect("attempt status column holds an invalid value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_supergroup_ids() {
        assert_eq!(
            normalize_group_id("1234567890", TargetGroupKind::Supergroup),
            "-1001234567890"
        );
        assert_eq!(
            normalize_group_id("-1001234567890", TargetGroupKind::Supergroup),
            "-1001234567890"
        );
        assert_eq!(normalize_group_id("-55", TargetGroupKind::Group), "-55");
    }

    #[test]
    fn idempotency_key_format() {
        assert_eq!(
            BroadcastAttempt::idempotency_key("camp-1", "grp-2"),
            "camp-1:grp-2"
        );
    }

    #[test]
    fn account_available_without_flood_wait() {
        let now = Utc::now();
        let account = TelegramAccount {
            id: "a1".into(),
            user_id: "u1".into(),
            phone_number: "+10000".into(),
            session_material: "secret".into(),
            is_active: true,
            is_flood_wait: false,
            flood_wait_until: None,
            created_at: now,
            updated_at: now,
        };
        assert!(account.is_available(now));
    }

    #[test]
    fn account_unavailable_during_flood_wait() {
        let now = Utc::now();
        let mut account = TelegramAccount {
            id: "a1".into(),
            user_id: "u1".into(),
            phone_number: "+10000".into(),
            session_material: "secret".into(),
            is_active: true,
            is_flood_wait: true,
            flood_wait_until: Some(now + chrono::Duration::seconds(60)),
            created_at: now,
            updated_at: now,
        };
        assert!(!account.is_available(now));
        account.flood_wait_until = Some(now - chrono::Duration::seconds(1));
        assert!(account.is_available(now));
    }
}

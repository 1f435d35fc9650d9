//! The BEX return object, matching the documented wire shape exactly.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Sent,
    Failed,
    Deferred,
    NoAccount,
    LockBusy,
    InactiveCampaign,
    StaleMessage,
    StaleInterval,
    ProviderConstrainedDelay,
    SkippedNonWorker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContinuationReason {
    ExactNextDue,
    ReadyPendingFast,
    DefaultDeferred,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub sent: i64,
    pub failed: i64,
    pub pending: i64,
    #[serde(rename = "inFlight")]
    pub in_flight: i64,
    #[serde(rename = "nextDueInMs")]
    pub next_due_in_ms: i64,
    #[serde(rename = "readyPendingCount")]
    pub ready_pending_count: i64,
    #[serde(rename = "providerConstrainedDelay")]
    pub provider_constrained_delay: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BexReport {
    pub success: bool,
    pub count: i64,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: Summary,
    pub outcome: Outcome,
    #[serde(rename = "scheduledAt")]
    pub scheduled_at: DateTime<Utc>,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "lagMs")]
    pub lag_ms: i64,
    #[serde(rename = "continuationEnqueued", skip_serializing_if = "Option::is_none")]
    pub continuation_enqueued: Option<bool>,
    #[serde(rename = "continuationDelayMs", skip_serializing_if = "Option::is_none")]
    pub continuation_delay_ms: Option<u64>,
    #[serde(rename = "continuationReason", skip_serializing_if = "Option::is_none")]
    pub continuation_reason: Option<ContinuationReason>,
}

impl BexReport {
    /// Short-circuit result for admission-check failures and lock contention:
    /// no attempts processed, no continuation.
    pub fn short_circuit(
        outcome: Outcome,
        success: bool,
        scheduled_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
        lag_ms: i64,
        error: Option<String>,
    ) -> Self {
        Self {
            success,
            count: 0,
            errors: error.clone().into_iter().collect(),
            error,
            summary: Summary::default(),
            outcome,
            scheduled_at,
            started_at,
            lag_ms,
            continuation_enqueued: None,
            continuation_delay_ms: None,
            continuation_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_documented_field_names() {
        let report = BexReport::short_circuit(
            Outcome::LockBusy,
            true,
            Utc::now(),
            Utc::now(),
            12,
            None,
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"lagMs\""));
        assert!(json.contains("\"outcome\":\"lock-busy\""));
        assert!(!json.contains("\"error\""));
    }
}

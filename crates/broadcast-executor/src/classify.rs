//! Retry Classifier: turns a raw Telegram send error into a retry decision.

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;

const SLOWMODE_DEFAULT_SECONDS: u64 = 300;

const RETRIABLE_TOKENS: &[&str] = &["FLOOD_WAIT", "FLOOD", "SLOWMODE_WAIT", "TIMEOUT", "ETIMEDOUT"];

const TERMINAL_TOKENS: &[&str] = &[
    "CHAT_WRITE_FORBIDDEN",
    "USER_BANNED_IN_CHANNEL",
    "CHANNEL_PRIVATE",
    "CHAT_ADMIN_REQUIRED",
    "PEER_ID_INVALID",
    "USER_DEACTIVATED",
    "BOT_WAS_BLOCKED",
    "INPUT_USER_DEACTIVATED",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub retriable: bool,
    pub terminal_code: String,
    pub retry_after_seconds: Option<u64>,
}

lazy_static! {
    static ref WAIT_OF_SECONDS: Regex = Regex::new(r"WAIT OF (\d+) SECONDS").unwrap();
    static ref WAIT_UNDERSCORE: Regex = Regex::new(r"(?:SLOWMODE_WAIT|FLOOD_WAIT)_(\d+)").unwrap();
}

/// Pulls a `retry_after_seconds` out of a structured field if present,
/// otherwise scans the uppercased message for the provider's wait directive.
fn normalize_retry_after(message: &str, structured_retry_after_seconds: Option<i64>) -> Option<u64> {
    if let Some(secs) = structured_retry_after_seconds {
        if secs > 0 {
            return Some(secs as u64);
        }
    }

    let upper = message.to_uppercase();
    if let Some(caps) = WAIT_OF_SECONDS.captures(&upper) {
        if let Ok(n) = caps[1].parse::<u64>() {
            return Some(n);
        }
    }
    if let Some(caps) = WAIT_UNDERSCORE.captures(&upper) {
        if let Ok(n) = caps[1].parse::<u64>() {
            return Some(n);
        }
    }
    if upper.contains("SLOWMODE_WAIT") {
        return Some(SLOWMODE_DEFAULT_SECONDS);
    }
    None
}

/// Classifies a raw error message (optionally paired with a structured
/// `retry_after_seconds` field) into a retry decision.
pub fn classify(message: &str, structured_retry_after_seconds: Option<i64>) -> Classification {
    let retry_after_seconds = normalize_retry_after(message, structured_retry_after_seconds);
    let upper = message.to_uppercase();

    for token in RETRIABLE_TOKENS {
        if upper.contains(token) {
            return Classification {
                retriable: true,
                terminal_code: "retriable-rate-limit".to_string(),
                retry_after_seconds,
            };
        }
    }

    for token in TERMINAL_TOKENS {
        if upper.contains(token) {
            return Classification {
                retriable: false,
                terminal_code: token.to_lowercase(),
                retry_after_seconds,
            };
        }
    }

    Classification {
        retriable: false,
        terminal_code: "unknown".to_string(),
        retry_after_seconds,
    }
}

/// Computes the next retry delay in milliseconds. Provider-mandated waits are
/// a hard lower bound and are never clamped by `max_delay_ms`.
pub fn compute_retry_delay_ms(
    retry_count: u32,
    retry_after_seconds: Option<u64>,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ratio: f64,
) -> u64 {
    let mut rng = rand::thread_rng();

    if let Some(secs) = retry_after_seconds {
        if secs > 0 {
            let provider = secs * 1000;
            let jitter_bound = ((provider as f64) * jitter_ratio).floor() as u64;
            let jitter = if jitter_bound > 0 { rng.gen_range(0..=jitter_bound) } else { 0 };
            return provider + jitter;
        }
    }

    let exponential = base_delay_ms.saturating_mul(1u64 << retry_count.min(32)).min(max_delay_ms);
    let jitter_bound = ((exponential as f64) * jitter_ratio).floor() as u64;
    let jitter = if jitter_bound > 0 { rng.gen_range(0..=jitter_bound) } else { 0 };
    (exponential + jitter).min(max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_slowmode_wait_is_retriable_with_exact_wait() {
        let c = classify("Telegram says: [420 SLOWMODE_WAIT_300]", None);
        assert!(c.retriable);
        assert_eq!(c.terminal_code, "retriable-rate-limit");
        assert_eq!(c.retry_after_seconds, Some(300));
    }

    #[test]
    fn s2_chat_write_forbidden_is_terminal() {
        let c = classify("CHAT_WRITE_FORBIDDEN", None);
        assert!(!c.retriable);
        assert_eq!(c.terminal_code, "chat_write_forbidden");
        assert_eq!(c.retry_after_seconds, None);
    }

    #[test]
    fn s3_flood_wait_exhausts_after_max_retries() {
        let max_retries = 3u32;
        let mut retry_count = 0u32;
        for _ in 0..4 {
            let c = classify("FLOOD_WAIT_5", None);
            assert!(c.retriable);
            retry_count += 1;
        }
        assert!(retry_count > max_retries, "4th failure must exceed max_retries=3");
    }

    #[test]
    fn unmatched_messages_are_terminal_unknown() {
        let c = classify("some unexpected provider error", None);
        assert!(!c.retriable);
        assert_eq!(c.terminal_code, "unknown");
    }

    #[test]
    fn provider_wait_lower_bound_is_never_clamped() {
        let delay = compute_retry_delay_ms(0, Some(300), 2_000, 120_000, 0.0);
        assert!(delay >= 300_000, "provider wait of 300s must not be clamped to max_delay_ms=120000");
    }

    #[test]
    fn exponential_backoff_is_clamped_to_max_delay() {
        let delay = compute_retry_delay_ms(10, None, 2_000, 120_000, 0.0);
        assert!(delay <= 120_000);
    }

    #[test]
    fn wait_of_seconds_phrasing_is_parsed() {
        let c = classify("Flood control exceeded. Must wait of 42 seconds before retry", None);
        assert_eq!(c.retry_after_seconds, Some(42));
    }

    #[test]
    fn generic_slowmode_wait_falls_back_to_default() {
        let c = classify("SLOWMODE_WAIT without a number", None);
        assert_eq!(c.retry_after_seconds, Some(SLOWMODE_DEFAULT_SECONDS));
    }

    #[test]
    fn structured_retry_after_seconds_takes_precedence() {
        let c = classify("FLOOD_WAIT_10", Some(99));
        assert_eq!(c.retry_after_seconds, Some(99));
    }
}

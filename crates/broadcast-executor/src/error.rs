//! Error types for the broadcast executor: the job-dispatch loop, the retry
//! classifier, and the Telegram client pool.

use thiserror::Error;

pub type BexResult<T> = std::result::Result<T, BexError>;

#[derive(Debug, Error)]
pub enum BexError {
    #[error("shared infrastructure error: {0}")]
    Shared(#[from] shared::Error),

    #[error("telegram API error: {0}")]
    Telegram(String),

    #[error("no active telegram account available")]
    NoAccount,

    #[error("target group not found: {0}")]
    MissingTarget(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BexError {
    pub fn telegram(msg: impl Into<String>) -> Self {
        BexError::Telegram(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        BexError::Internal(msg.into())
    }

    /// Infrastructure failures short-circuit a run without scheduling a
    /// continuation; provider/semantic failures are handled per-attempt.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            BexError::Shared(e) => e.is_infrastructure(),
            BexError::Internal(_) => true,
            BexError::Telegram(_) | BexError::NoAccount | BexError::MissingTarget(_) => false,
        }
    }

    /// Strips anything that looks like it could carry `session_material` or a
    /// bot token before an error reaches a log line or the BEX result object.
    pub fn safe_message(&self) -> String {
        match self {
            BexError::Shared(_) => "infrastructure error".to_string(),
            BexError::Telegram(msg) => redact_credential_like(msg),
            BexError::NoAccount => "no active telegram account available".to_string(),
            BexError::MissingTarget(id) => format!("target group not found: {id}"),
            BexError::Internal(_) => "internal error".to_string(),
        }
    }
}

/// Bot-token-shaped substrings (`<digits>:<35 alnum chars>`) are replaced so a
/// client error that happens to echo the credential back never reaches a log.
fn redact_credential_like(msg: &str) -> String {
    lazy_static::lazy_static! {
        static ref TOKEN_RE: regex::Regex = regex::Regex::new(r"\d{6,}:[A-Za-z0-9_-]{20,}").unwrap();
    }
    TOKEN_RE.replace_all(msg, "[redacted]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bot_token_shaped_substrings() {
        let msg = "failed using token 123456789:AAExampleTokenValueRedactedxxxxxx";
        let redacted = redact_credential_like(msg);
        assert!(!redacted.contains("AAExampleTokenValueRedactedxxxxxx"));
        assert!(redacted.contains("[redacted]"));
    }

    #[test]
    fn infrastructure_errors_are_flagged() {
        assert!(BexError::internal("boom").is_infrastructure());
        assert!(!BexError::NoAccount.is_infrastructure());
        assert!(!BexError::telegram("CHAT_WRITE_FORBIDDEN").is_infrastructure());
    }
}

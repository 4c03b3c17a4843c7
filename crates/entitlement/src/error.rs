//! Entitlement error types

use thiserror::Error;

pub type EntitlementResult<T> = Result<T, EntitlementError>;

/// Errors produced by the entitlement engine.
///
/// The retry semantics differ per variant and the HTTP layer must map them
/// deliberately: `InvalidSignature`, `MalformedEvent` and `UnknownPlan` are
/// fatal (redelivery of the same payload can never succeed), `QuotaExceeded`
/// is an expected business outcome, and `Database` is transient - returning
/// it from the webhook path without recording the event is what allows the
/// provider to redeliver.
#[derive(Debug, Error)]
pub enum EntitlementError {
    /// Webhook payload failed HMAC verification. Never applied, never retried
    /// internally; the payment provider retries delivery on its own schedule.
    #[error("webhook signature verification failed")]
    InvalidSignature,

    /// Event body could not be decoded into a payment event.
    #[error("malformed payment event: {0}")]
    MalformedEvent(String),

    /// Event carried a plan kind outside the fixed grant table.
    #[error("unknown plan kind: {0}")]
    UnknownPlan(String),

    /// Free-tier allowance exhausted and no paid source available.
    #[error("demo quota exceeded ({used}/{limit})")]
    QuotaExceeded { used: i32, limit: i32 },

    /// Store failure. Transient: callers (and the payment provider) retry.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Required configuration missing or unparseable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EntitlementError {
    /// True for failures where a retry of the identical input may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EntitlementError::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EntitlementError::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(!EntitlementError::InvalidSignature.is_transient());
        assert!(!EntitlementError::UnknownPlan("mega".into()).is_transient());
        assert!(!EntitlementError::QuotaExceeded { used: 3, limit: 3 }.is_transient());
    }
}

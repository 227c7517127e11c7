use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionPhase;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineErrorCategory {
    /// Invalid input, unknown identifier, or other configuration issue.
    Config,
    /// Authentication/authorization failure reported by the backend.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the backend.
    RateLimited,
    /// Payload could not be decoded or encoded.
    Serialization,
    /// Internal engine bug or invariant break.
    Internal,
}

/// Stable engine error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct EngineError {
    /// High-level error category.
    pub category: EngineErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl EngineError {
    /// Construct a new engine error.
    pub fn new(
        category: EngineErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-phase-transition error.
    pub fn invalid_phase(current: ConnectionPhase, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            EngineErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is in phase {current:?}"),
        )
    }

    /// Whether the supervisor may recover from this error by retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            EngineErrorCategory::Network | EngineErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to engine error categories.
///
/// For gateway implementations translating REST and stream responses into
/// [`EngineError`]s; the engine itself never sees raw status codes.
pub fn classify_http_status(status: u16) -> EngineErrorCategory {
    match status {
        401 | 403 => EngineErrorCategory::Auth,
        408 | 429 => EngineErrorCategory::RateLimited,
        400..=499 => EngineErrorCategory::Config,
        500..=599 => EngineErrorCategory::Network,
        _ => EngineErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), EngineErrorCategory::Auth);
        assert_eq!(classify_http_status(429), EngineErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), EngineErrorCategory::Config);
        assert_eq!(classify_http_status(503), EngineErrorCategory::Network);
        assert_eq!(classify_http_status(700), EngineErrorCategory::Internal);
    }

    #[test]
    fn keeps_invalid_phase_error_code_stable() {
        let err = EngineError::invalid_phase(ConnectionPhase::Terminated, "connect");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, EngineErrorCategory::Internal);
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = EngineError::new(EngineErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms, Some(3000));
    }

    #[test]
    fn recoverable_categories_are_network_and_rate_limit() {
        let network = EngineError::new(EngineErrorCategory::Network, "n", "network");
        let rate = EngineError::new(EngineErrorCategory::RateLimited, "r", "rate");
        let auth = EngineError::new(EngineErrorCategory::Auth, "a", "auth");

        assert!(network.is_recoverable());
        assert!(rate.is_recoverable());
        assert!(!auth.is_recoverable());
    }
}

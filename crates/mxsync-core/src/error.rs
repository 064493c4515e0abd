use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state_machine::SyncPhase;

/// Broad error category used for retry decisions and user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid input, unknown resource, or other request validation issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by homeserver.
    RateLimited,
    /// Token store or other local persistence failure.
    Storage,
    /// Serialization/deserialization failure.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

impl ErrorCategory {
    /// Whether a sync loop may retry after an error of this category.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::RateLimited)
    }
}

/// Stable, serializable fault reported by sync processors and the sync
/// state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncFault {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncFault {
    /// Construct a new fault.
    pub fn new(
        category: ErrorCategory,
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

    /// Attach a retry hint to the fault.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Retry hint as a [`Duration`], when the server supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    /// Build a standard invalid-phase-transition fault.
    pub fn invalid_transition(from: SyncPhase, to: SyncPhase) -> Self {
        Self::new(
            ErrorCategory::Internal,
            "invalid_phase_transition",
            format!("sync run cannot move from {from:?} to {to:?}"),
        )
    }
}

/// Map HTTP status codes to error categories.
///
/// Status `0` means no response was obtained at all and is treated as a
/// network failure.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        0 => ErrorCategory::Network,
        401 | 403 => ErrorCategory::Auth,
        408 | 429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}

/// Map a Matrix `errcode` to an error category.
///
/// Returns `None` for codes that carry no category information of their own,
/// in which case callers fall back to [`classify_http_status`].
pub fn classify_errcode(errcode: &str) -> Option<ErrorCategory> {
    match errcode {
        "M_LIMIT_EXCEEDED" => Some(ErrorCategory::RateLimited),
        "M_FORBIDDEN" | "M_UNKNOWN_TOKEN" | "M_MISSING_TOKEN" | "M_USER_DEACTIVATED" => {
            Some(ErrorCategory::Auth)
        }
        "M_BAD_JSON" | "M_NOT_JSON" | "M_INVALID_PARAM" | "M_MISSING_PARAM" | "M_NOT_FOUND"
        | "M_UNRECOGNIZED" | "M_USER_IN_USE" | "M_INVALID_USERNAME" | "M_ROOM_IN_USE"
        | "M_TOO_LARGE" | "M_EXCLUSIVE" => Some(ErrorCategory::Config),
        _ => None,
    }
}

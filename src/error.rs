//! Closed error enumeration: sized variants, not strings. Free-form
//! strings are for logging context only, never for control flow.

use thiserror::Error;

/// The four error kinds, used to drive the orchestrator's response (skip
/// cycle, reject intent, stop opening new positions, or shut down).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network/timeout/5xx/rate-limit — retried, surfaces only after retries
    /// are exhausted. Cycle is skipped.
    Transient,
    /// Insufficient balance, lot-size, min-notional, filter veto, cap
    /// reached — not retried, intent discarded.
    PolicyRejection,
    /// Feature-count mismatch, scaler not fitted, model missing, clock
    /// drift — signal emission refused, existing positions still managed.
    Integrity,
    /// Auth revoked, repeated unrecoverable exchange errors, unreadable
    /// config — initiates graceful shutdown.
    Fatal,
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("exchange rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("transient exchange error: {0}")]
    Transient(String),

    #[error("exchange rejected request: {0}")]
    ExchangePermanent(String),

    #[error("policy rejection ({reason}): {detail}")]
    PolicyRejection { reason: &'static str, detail: String },

    #[error("model integrity failure: {0}")]
    ModelIntegrity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("clock drift {drift_secs}s exceeds threshold {threshold_secs}s")]
    ClockDrift { drift_secs: i64, threshold_secs: i64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::RateLimited { .. } | BotError::Transient(_) | BotError::Io(_) => {
                ErrorKind::Transient
            }
            BotError::PolicyRejection { .. } => ErrorKind::PolicyRejection,
            BotError::ModelIntegrity(_) | BotError::ClockDrift { .. } | BotError::Json(_) => {
                ErrorKind::Integrity
            }
            BotError::ExchangePermanent(_) | BotError::Config(_) | BotError::Authentication(_) => {
                ErrorKind::Fatal
            }
        }
    }
}

pub type BotResult<T> = Result<T, BotError>;

/// Process exit codes for the CLI surface.
pub mod exit_code {
    pub const GRACEFUL: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const AUTH_ERROR: i32 = 2;
    pub const UNRECOVERABLE_EXCHANGE: i32 = 3;
    pub const INTERRUPTED: i32 = 130;
}

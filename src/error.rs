use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type TurnstileResult<T> = Result<T, TurnstileError>;

/// Why a checking stage refused an invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BlockReason {
    AuthorityDenied { origin: Option<String> },
    SystemOverload { in_flight: u64, limit: u64 },
    ConcurrencyExceeded { in_flight: u64, limit: u64 },
    RateExceeded { attempts: u64, limit: u64 },
    CircuitOpen { retry_after_ms: u64 },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::AuthorityDenied { origin: Some(origin) } => {
                write!(f, "origin '{}' is denied", origin)
            }
            BlockReason::AuthorityDenied { origin: None } => {
                write!(f, "calls without an origin are denied")
            }
            BlockReason::SystemOverload { in_flight, limit } => {
                write!(f, "system overload: {} in flight (ceiling {})", in_flight, limit)
            }
            BlockReason::ConcurrencyExceeded { in_flight, limit } => {
                write!(f, "concurrency limit reached: {} in flight (limit {})", in_flight, limit)
            }
            BlockReason::RateExceeded { attempts, limit } => {
                write!(f, "rate limit reached: {} calls this second (limit {})", attempts, limit)
            }
            BlockReason::CircuitOpen { retry_after_ms } => {
                write!(f, "circuit open, retry in {}ms", retry_after_ms)
            }
        }
    }
}

/// Typed rejection returned when a stage blocks an invocation. Expected and
/// high-frequency under load; callers branch on it for fallbacks, it is never
/// logged as a system error.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("'{resource}' blocked by {stage}: {reason}")]
pub struct Blocked {
    pub resource: String,
    pub stage: &'static str,
    pub reason: BlockReason,
}

/// Unexpected failure inside a stage hook. Carried on a separate channel from
/// [`Blocked`] so rejections and faults can never be confused.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StageFault {
    pub message: String,
}

impl StageFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<String> for StageFault {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for StageFault {
    fn from(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum TurnstileError {
    #[error(transparent)]
    Blocked(#[from] Blocked),
    #[error("stage '{stage}' fault: {fault}")]
    StageFault { stage: &'static str, fault: StageFault },
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// The typed rejection, if this error is a block rather than a fault.
    pub fn blocked(&self) -> Option<&Blocked> {
        match self {
            TurnstileError::Blocked(blocked) => Some(blocked),
            _ => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, TurnstileError::Blocked(_))
    }
}

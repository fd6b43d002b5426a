use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::ReservationStatus;

/// Why a requested status change was refused. Never accompanied by a write.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("reservation is for {reserved}, today is {today}")]
    WrongDate { reserved: NaiveDate, today: NaiveDate },
    #[error("reservation is {actual}, needs to be {expected}")]
    WrongStatus {
        actual: ReservationStatus,
        expected: &'static str,
    },
    #[error("check-in opens at {opens_at}")]
    TooEarly { opens_at: NaiveDateTime },
    #[error("check-in closed at {closed_at}")]
    WindowClosed { closed_at: NaiveDateTime },
    #[error("{distance_m:.1} m from the space, limit is {limit_m} m")]
    TooFar { distance_m: f64, limit_m: f64 },
    #[error("reservation is already {0}")]
    AlreadyFinal(ReservationStatus),
}

impl TransitionError {
    pub fn label(&self) -> &'static str {
        match self {
            TransitionError::WrongDate { .. } => "wrong_date",
            TransitionError::WrongStatus { .. } => "wrong_status",
            TransitionError::TooEarly { .. } => "too_early",
            TransitionError::WindowClosed { .. } => "window_closed",
            TransitionError::TooFar { .. } => "too_far",
            TransitionError::AlreadyFinal(_) => "already_final",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Space or reservation absent, or not owned by the caller.
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("overlaps reservation {0}")]
    Conflict(Ulid),
    #[error("space {0} is busy, retry shortly")]
    LockContention(Ulid),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("journal error: {0}")]
    Journal(String),
}

/// Response category a client can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    LockContention,
    InvalidStateTransition,
    DependencyFailure,
}

impl ErrorKind {
    /// Only lock contention is worth an immediate retry with the same input.
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::LockContention
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::LockContention => "lock_contention",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::DependencyFailure => "dependency_failure",
        }
    }
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::Conflict(_) | EngineError::AlreadyExists(_) => ErrorKind::Conflict,
            EngineError::LockContention(_) => ErrorKind::LockContention,
            EngineError::InvalidTransition(_) => ErrorKind::InvalidStateTransition,
            EngineError::Journal(_) => ErrorKind::DependencyFailure,
        }
    }
}

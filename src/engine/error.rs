use ulid::Ulid;

use crate::model::{ReservationStatus, UnknownState};

#[derive(Debug)]
pub enum EngineError {
    /// Missing entity, or an entity the caller is not allowed to see.
    NotFound(Ulid),
    Validation(&'static str),
    InvalidTransition {
        id: Ulid,
        status: ReservationStatus,
    },
    UnknownState(String),
    InvalidPagination {
        from: i64,
        size: i64,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::InvalidTransition { id, status } => {
                write!(f, "reservation {id} is already {status}")
            }
            EngineError::UnknownState(state) => write!(f, "Unknown state: {state}"),
            EngineError::InvalidPagination { from, size } => {
                write!(f, "invalid pagination: from={from}, size={size}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<UnknownState> for EngineError {
    fn from(e: UnknownState) -> Self {
        EngineError::UnknownState(e.0)
    }
}

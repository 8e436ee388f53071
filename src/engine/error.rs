use thiserror::Error;
use ulid::Ulid;

use crate::model::InvalidTransition;

/// Which invariant a conflicting reservation violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Room,
    User,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Room => f.write_str("room"),
            ConflictKind::User => f.write_str("user"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("{kind} conflict with reservation {with}")]
    Conflict { kind: ConflictKind, with: Ulid },
    #[error("actor may not modify this reservation")]
    Forbidden,
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("reservation {0} has not ended yet")]
    NotEnded(Ulid),
    #[error("timed out waiting for ledger lock")]
    Timeout,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl StoreError {
    /// Failures that say nothing about the business state and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Wal(_))
    }
}

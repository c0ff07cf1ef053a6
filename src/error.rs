//! Error handling for the mandate session core
//!
//! Every controller failure is a [`MandateError`] with its own message. Callers
//! that only need to branch on the category use [`MandateError::kind`].

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::models::MandateStatus;

/// Failures raised by a session store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Timed out waiting for row lock on {row}")]
    LockTimeout { row: String },

    #[error("Stored value could not be decoded: {message}")]
    Corrupt { message: String },

    #[error("Row already exists: {row}")]
    Duplicate { row: String },
}

/// Error categories exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Invalid,
    Transient,
    Fatal,
}

impl ErrorKind {
    /// Only transient failures may be retried, and only as a fresh request.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller and registry errors
#[derive(Error, Debug)]
pub enum MandateError {
    #[error("Worker {worker_id} not found")]
    WorkerNotFound { worker_id: Uuid },

    #[error("Mandate {mandate_id} not found")]
    MandateNotFound { mandate_id: Uuid },

    #[error("No active session found to pause for worker {worker_id} on mandate {mandate_id}")]
    NoActiveSession { worker_id: Uuid, mandate_id: Uuid },

    #[error("No paused session found to resume for worker {worker_id} on mandate {mandate_id}")]
    NoPausedSession { worker_id: Uuid, mandate_id: Uuid },

    #[error("No active mandate found for worker {worker_id}")]
    NoActiveMandate { worker_id: Uuid },

    #[error("Mandate {mandate_id} not found or not assigned to worker {worker_id}")]
    MandateNotHeld { worker_id: Uuid, mandate_id: Uuid },

    #[error("Worker {worker_id} already has an active mandate ({active_mandate_id})")]
    WorkerBusy {
        worker_id: Uuid,
        active_mandate_id: Uuid,
    },

    #[error("Mandate {mandate_id} is already in progress")]
    MandateInProgress { mandate_id: Uuid },

    #[error("Mandate {mandate_id} was already submitted ({status})")]
    MandateClosed {
        mandate_id: Uuid,
        status: MandateStatus,
    },

    #[error("Mandate {mandate_id} is not assigned to worker {worker_id}")]
    NotAssigned { worker_id: Uuid, mandate_id: Uuid },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Inconsistent state: {message}")]
    Inconsistent { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MandateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MandateError::WorkerNotFound { .. }
            | MandateError::MandateNotFound { .. }
            | MandateError::NoActiveSession { .. }
            | MandateError::NoPausedSession { .. }
            | MandateError::NoActiveMandate { .. }
            | MandateError::MandateNotHeld { .. } => ErrorKind::NotFound,
            MandateError::WorkerBusy { .. }
            | MandateError::MandateInProgress { .. }
            | MandateError::MandateClosed { .. } => ErrorKind::Conflict,
            MandateError::NotAssigned { .. } => ErrorKind::Forbidden,
            MandateError::InvalidRequest { .. } => ErrorKind::Invalid,
            // Bad stored data or a clashing key will not go away on retry.
            MandateError::Store(StoreError::Corrupt { .. } | StoreError::Duplicate { .. }) => {
                ErrorKind::Fatal
            }
            MandateError::Store(_) => ErrorKind::Transient,
            MandateError::Inconsistent { .. } => ErrorKind::Fatal,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        MandateError::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        MandateError::Inconsistent {
            message: message.into(),
        }
    }
}

/// Result type aliases for convenience
pub type MandateResult<T> = Result<T, MandateError>;
pub type StoreResult<T> = Result<T, StoreError>;

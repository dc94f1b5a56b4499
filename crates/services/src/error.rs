//! Shared error types for the services crate.

use thiserror::Error;

use learnpath_core::hearts::HeartsError;
use learnpath_core::model::{AttemptError, AttemptTarget, QuestionId};
use storage::repository::StorageError;

use crate::sessions::SessionPhase;

/// Errors emitted by `ProgressionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by test sessions and their async loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("an answer is already being submitted")]
    RequestInFlight,
    #[error("no answer is being submitted")]
    NoRequestInFlight,
    #[error("question {0} is not the current question")]
    NotCurrentQuestion(QuestionId),
    #[error("session does not accept this action while in {0:?}")]
    NotAccepting(SessionPhase),
    #[error("current question has not been answered")]
    NotAnswered,
    #[error("attempt has not produced a result yet")]
    NotComplete,
    #[error("{0} is locked")]
    TargetLocked(AttemptTarget),
    #[error("{0} does not exist in this curriculum")]
    UnknownTarget(AttemptTarget),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Hearts(#[from] HeartsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Whether the same call may succeed if simply repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

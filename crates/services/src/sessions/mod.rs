mod progress;
mod queries;
mod resume;
mod service;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use progress::SessionProgress;
pub use resume::{ResumeController, ResumedAttempt};
pub use service::{
    AnswerGate, AnswerOutcome, SessionContext, SessionEvent, SessionPhase, TestSession,
};
pub use workflow::{SessionStart, TestSessionLoop};

pub(crate) use queries::SessionQueries;

#![forbid(unsafe_code)]

pub mod error;
pub mod events;
pub mod progression_service;
pub mod sessions;

pub use learnpath_core::Clock;
pub use sessions as session;

pub use error::{ProgressionError, SessionError};
pub use events::{CollectingEventSink, EventSink, NoopEventSink, TracingEventSink};
pub use progression_service::ProgressionService;

pub use sessions::{
    AnswerOutcome, ResumeController, ResumedAttempt, SessionEvent, SessionPhase, SessionProgress,
    SessionStart, TestSession, TestSessionLoop,
};

#![forbid(unsafe_code)]

pub mod memory;
pub mod repository;

pub use memory::{DEFAULT_HEARTS, FailPoint, InMemoryRepository};
pub use repository::{
    AttemptRecord, CurriculumRepository, IssuedAttempt, ProgressStore, QuestionSource, Storage,
    StorageError,
};

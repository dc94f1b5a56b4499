use thiserror::Error;

use crate::hearts::HeartsError;
use crate::model::{
    AttemptError, CurriculumError, QuestionError, SettingsError, UnitError,
};

/// Umbrella error for callers that do not care which model rejected input.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Curriculum(#[from] CurriculumError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Hearts(#[from] HeartsError),
}

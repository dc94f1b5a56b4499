mod attempt;
mod curriculum;
mod ids;
mod question;
mod result;
mod settings;
mod unit;

pub use ids::{AttemptId, CurriculumId, ParseIdError, QuestionId, UnitId, UserId};

pub use attempt::{AnswerRecord, AttemptError, AttemptMode, AttemptTarget, TestAttempt};
pub use curriculum::{Curriculum, CurriculumError, DEFAULT_FINAL_PASSING_SCORE, FinalTest};
pub use question::{Answer, Question, QuestionError, QuestionKind};
pub use result::{AttemptResult, score_percent};
pub use settings::{
    AdPolicy, DEFAULT_UNIT_PASSING_SCORE, SessionSettings, SessionSettingsDraft, SettingsError,
};
pub use unit::{GRID_COLUMNS, GridCell, Unit, UnitError};

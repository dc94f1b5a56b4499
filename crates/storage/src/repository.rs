use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use learnpath_core::hearts::HeartsSnapshot;
use learnpath_core::model::{
    Answer, AnswerRecord, AttemptError, AttemptId, AttemptMode, AttemptResult, AttemptTarget,
    Curriculum, CurriculumId, Question, QuestionId, TestAttempt, UnitId, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::InMemoryRepository;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Transient failures the caller may retry unchanged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Unavailable(_))
    }
}

/// Persisted shape of an attempt, used to resume after an interruption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,
    pub user_id: UserId,
    pub curriculum_id: CurriculumId,
    pub target: AttemptTarget,
    pub mode: AttemptMode,
    pub questions: Vec<Question>,
    pub answers: HashMap<QuestionId, AnswerRecord>,
    pub finished: bool,
}

impl AttemptRecord {
    /// Convert the record back into a domain `TestAttempt`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError` if the stored answers no longer match the question list.
    pub fn into_attempt(self) -> Result<TestAttempt, AttemptError> {
        TestAttempt::from_persisted(
            self.attempt_id,
            self.target,
            self.mode,
            self.questions,
            self.answers,
        )
    }
}

/// Question list issued for a new attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAttempt {
    pub attempt_id: AttemptId,
    pub questions: Vec<Question>,
}

/// Source of curriculum definitions authored elsewhere.
#[async_trait]
pub trait CurriculumRepository: Send + Sync {
    /// Fetch a curriculum with its units and final test.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_curriculum(&self, id: CurriculumId) -> Result<Curriculum, StorageError>;
}

/// Learner progress: approved units, hearts, and recorded results.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Units the learner has passed at least once.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if progress cannot be read.
    async fn get_approved_unit_ids(
        &self,
        user: UserId,
        curriculum: CurriculumId,
    ) -> Result<HashSet<UnitId>, StorageError>;

    /// Whether a passing final-test attempt is on record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if progress cannot be read.
    async fn has_passed_final(
        &self,
        user: UserId,
        curriculum: CurriculumId,
    ) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the balance cannot be read.
    async fn get_hearts(&self, user: UserId) -> Result<HeartsSnapshot, StorageError>;

    /// Debit hearts and return the new authoritative balance (never below zero).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the debit was not applied.
    async fn debit_hearts(&self, user: UserId, amount: u32) -> Result<u32, StorageError>;

    /// Credit hearts and return the new authoritative balance.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the credit was not applied.
    async fn credit_hearts(&self, user: UserId, amount: u32) -> Result<u32, StorageError>;

    /// Store the final outcome of an attempt. Passing results extend the
    /// approved set (units) or mark the final test passed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the result was not stored.
    async fn record_attempt_result(
        &self,
        attempt_id: AttemptId,
        result: &AttemptResult,
    ) -> Result<(), StorageError>;
}

/// Issues question lists, grades answers, and keeps in-flight attempts resumable.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if no question list can be issued.
    async fn start_attempt(
        &self,
        user: UserId,
        curriculum: CurriculumId,
        target: AttemptTarget,
        mode: AttemptMode,
    ) -> Result<IssuedAttempt, StorageError>;

    /// Grading rules vary per question type and are opaque to callers.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if grading could not be performed.
    async fn grade_answer(&self, question: &Question, answer: &Answer)
    -> Result<bool, StorageError>;

    /// Persist one answer so the attempt can be resumed. Idempotent per question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown attempts, or other storage errors.
    async fn save_answer(
        &self,
        attempt_id: AttemptId,
        question_id: QuestionId,
        record: &AnswerRecord,
    ) -> Result<(), StorageError>;

    /// Look up an attempt by its opaque id. `Ok(None)` if unknown.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup itself failed.
    async fn load_attempt(&self, attempt_id: AttemptId)
    -> Result<Option<AttemptRecord>, StorageError>;
}

/// Aggregates the collaborator contracts behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub curricula: Arc<dyn CurriculumRepository>,
    pub progress: Arc<dyn ProgressStore>,
    pub questions: Arc<dyn QuestionSource>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> (Self, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        (Self::from_repo(&repo), repo)
    }

    #[must_use]
    pub fn from_repo(repo: &InMemoryRepository) -> Self {
        let curricula: Arc<dyn CurriculumRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressStore> = Arc::new(repo.clone());
        let questions: Arc<dyn QuestionSource> = Arc::new(repo.clone());
        Self {
            curricula,
            progress,
            questions,
        }
    }
}

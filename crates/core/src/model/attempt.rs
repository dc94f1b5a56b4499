use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AttemptId, QuestionId, UnitId};
use crate::model::question::{Answer, Question};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("attempt has no questions")]
    Empty,

    #[error("question {0} appears more than once in the attempt")]
    DuplicateQuestion(QuestionId),

    #[error("question {0} is not part of this attempt")]
    UnknownQuestion(QuestionId),
}

//
// ─── TARGET / MODE ─────────────────────────────────────────────────────────────
//

/// What an attempt is testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "unit_id", rename_all = "snake_case")]
pub enum AttemptTarget {
    Unit(UnitId),
    FinalTest,
}

impl fmt::Display for AttemptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptTarget::Unit(id) => write!(f, "unit {id}"),
            AttemptTarget::FinalTest => f.write_str("final test"),
        }
    }
}

/// Scored attempts cost hearts on wrong answers; practice attempts never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptMode {
    #[default]
    Scored,
    Practice,
}

//
// ─── ANSWER RECORD ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub answer: Answer,
    pub is_correct: bool,
    pub time_spent_secs: u32,
}

//
// ─── TEST ATTEMPT ──────────────────────────────────────────────────────────────
//

/// One run through a unit's (or the final test's) question list.
///
/// Each question accepts exactly one answer; the cursor only moves forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestAttempt {
    id: AttemptId,
    target: AttemptTarget,
    mode: AttemptMode,
    questions: Vec<Question>,
    answers: HashMap<QuestionId, AnswerRecord>,
    cursor: usize,
}

impl TestAttempt {
    /// Creates a fresh attempt positioned at the first question.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Empty` for an empty question list and
    /// `AttemptError::DuplicateQuestion` if a question id repeats.
    pub fn new(
        id: AttemptId,
        target: AttemptTarget,
        mode: AttemptMode,
        questions: Vec<Question>,
    ) -> Result<Self, AttemptError> {
        Self::from_persisted(id, target, mode, questions, HashMap::new())
    }

    /// Rehydrates an attempt that was interrupted part-way through.
    ///
    /// The cursor lands on the first unanswered question, or past the end if
    /// every question already has an answer.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::UnknownQuestion` when a stored answer points at a
    /// question the list no longer contains.
    pub fn from_persisted(
        id: AttemptId,
        target: AttemptTarget,
        mode: AttemptMode,
        questions: Vec<Question>,
        answers: HashMap<QuestionId, AnswerRecord>,
    ) -> Result<Self, AttemptError> {
        if questions.is_empty() {
            return Err(AttemptError::Empty);
        }

        let mut seen = HashSet::with_capacity(questions.len());
        for question in &questions {
            if !seen.insert(question.id()) {
                return Err(AttemptError::DuplicateQuestion(question.id()));
            }
        }
        if let Some(stray) = answers.keys().find(|id| !seen.contains(id)) {
            return Err(AttemptError::UnknownQuestion(*stray));
        }

        let cursor = questions
            .iter()
            .position(|q| !answers.contains_key(&q.id()))
            .unwrap_or(questions.len());

        Ok(Self {
            id,
            target,
            mode,
            questions,
            answers,
            cursor,
        })
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn target(&self) -> AttemptTarget {
        self.target
    }

    #[must_use]
    pub fn mode(&self) -> AttemptMode {
        self.mode
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &HashMap<QuestionId, AnswerRecord> {
        &self.answers
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.cursor)
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id() == id)
    }

    #[must_use]
    pub fn is_answered(&self, id: QuestionId) -> bool {
        self.answers.contains_key(&id)
    }

    /// True once the cursor has moved past the last question.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.questions.len()
    }

    /// Number of answers graded correct so far.
    #[must_use]
    pub fn correct_count(&self) -> usize {
        self.answers.values().filter(|r| r.is_correct).count()
    }

    /// Stores the answer for a question.
    ///
    /// Returns `Ok(false)` without touching anything if the question was
    /// already answered.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::UnknownQuestion` for ids outside this attempt.
    pub fn record_answer(
        &mut self,
        question_id: QuestionId,
        record: AnswerRecord,
    ) -> Result<bool, AttemptError> {
        if self.question(question_id).is_none() {
            return Err(AttemptError::UnknownQuestion(question_id));
        }
        if self.answers.contains_key(&question_id) {
            return Ok(false);
        }
        self.answers.insert(question_id, record);
        Ok(true)
    }

    /// Moves the cursor one question forward. Saturates at the end.
    pub fn advance(&mut self) {
        if self.cursor < self.questions.len() {
            self.cursor += 1;
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

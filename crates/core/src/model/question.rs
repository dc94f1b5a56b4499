use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question prompt cannot be empty")]
    EmptyPrompt,

    #[error("multiple choice needs at least two options")]
    TooFewOptions,

    #[error("correct option {index} is out of range for {len} options")]
    OptionOutOfRange { index: usize, len: usize },

    #[error("fill-in-blank needs at least one accepted answer")]
    NoAcceptedAnswers,

    #[error("word ordering needs at least two words")]
    TooFewWords,
}

//
// ─── QUESTION KIND ─────────────────────────────────────────────────────────────
//

/// Answer key, one shape per supported question type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<String>,
        correct_option: usize,
    },
    FillInBlank {
        accepted: Vec<String>,
    },
    TrueFalse {
        answer: bool,
    },
    WordOrdering {
        words: Vec<String>,
    },
}

/// A learner's response. Variants mirror `QuestionKind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Choice(usize),
    Text(String),
    Boolean(bool),
    Ordering(Vec<String>),
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    prompt: String,
    kind: QuestionKind,
}

impl Question {
    /// Creates a question after validating its answer key.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the prompt is blank or the answer key is unusable.
    pub fn new(
        id: QuestionId,
        prompt: impl Into<String>,
        kind: QuestionKind,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }

        match &kind {
            QuestionKind::MultipleChoice {
                options,
                correct_option,
            } => {
                if options.len() < 2 {
                    return Err(QuestionError::TooFewOptions);
                }
                if *correct_option >= options.len() {
                    return Err(QuestionError::OptionOutOfRange {
                        index: *correct_option,
                        len: options.len(),
                    });
                }
            }
            QuestionKind::FillInBlank { accepted } => {
                if accepted.iter().all(|a| a.trim().is_empty()) {
                    return Err(QuestionError::NoAcceptedAnswers);
                }
            }
            QuestionKind::TrueFalse { .. } => {}
            QuestionKind::WordOrdering { words } => {
                if words.len() < 2 {
                    return Err(QuestionError::TooFewWords);
                }
            }
        }

        Ok(Self {
            id,
            prompt: prompt.trim().to_owned(),
            kind,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn kind(&self) -> &QuestionKind {
        &self.kind
    }

    /// Grades an answer against the stored key.
    ///
    /// An answer whose shape does not match the question type is incorrect.
    #[must_use]
    pub fn grade(&self, answer: &Answer) -> bool {
        match (&self.kind, answer) {
            (QuestionKind::MultipleChoice { correct_option, .. }, Answer::Choice(picked)) => {
                picked == correct_option
            }
            (QuestionKind::FillInBlank { accepted }, Answer::Text(text)) => {
                let given = normalize_text(text);
                !given.is_empty() && accepted.iter().any(|a| normalize_text(a) == given)
            }
            (QuestionKind::TrueFalse { answer: expected }, Answer::Boolean(given)) => {
                expected == given
            }
            (QuestionKind::WordOrdering { words }, Answer::Ordering(given)) => {
                words.len() == given.len()
                    && words
                        .iter()
                        .zip(given)
                        .all(|(w, g)| normalize_text(w) == normalize_text(g))
            }
            _ => false,
        }
    }
}

/// Lowercases and collapses runs of whitespace.
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

use serde::{Deserialize, Serialize};

use crate::model::attempt::{AttemptTarget, TestAttempt};

/// `round(100 * correct / total)` with halves rounded up.
///
/// Returns 0 for an empty attempt.
#[must_use]
pub fn score_percent(correct: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = u64::from(correct.min(total));
    let total = u64::from(total);
    let rounded = (200 * correct + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

/// Outcome of a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub target: AttemptTarget,
    pub total_questions: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub score: u8,
    pub passing_score: u8,
    pub passed: bool,
    pub xp_awarded: u32,
    pub unique_wrong: u32,
}

impl AttemptResult {
    /// Scores an attempt. Unanswered questions count against the score.
    #[must_use]
    pub fn from_attempt(attempt: &TestAttempt, passing_score: u8, xp_reward: u32) -> Self {
        let total = u32::try_from(attempt.total_questions()).unwrap_or(u32::MAX);
        let correct = u32::try_from(attempt.correct_count()).unwrap_or(u32::MAX);
        let answered = u32::try_from(attempt.answers().len()).unwrap_or(u32::MAX);
        let incorrect = answered.saturating_sub(correct);
        let score = score_percent(correct, total);
        let passed = score >= passing_score;

        Self {
            target: attempt.target(),
            total_questions: total,
            correct,
            incorrect,
            score,
            passing_score,
            passed,
            xp_awarded: if passed { xp_reward } else { 0 },
            unique_wrong: incorrect,
        }
    }

    #[must_use]
    pub fn is_perfect(&self) -> bool {
        self.total_questions > 0 && self.correct == self.total_questions
    }
}

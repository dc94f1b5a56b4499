use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use learnpath_core::hearts::{HeartsChange, HeartsLedger, HeartsRequest, HeartsSnapshot};
use learnpath_core::model::{
    Answer, AnswerRecord, AttemptError, AttemptId, AttemptMode, AttemptResult, AttemptTarget,
    CurriculumId, Question, QuestionId, SessionSettings, TestAttempt, UnitId, UserId,
};
use learnpath_core::overlay::{OverlayKind, OverlayTimers, TimerToken};
use learnpath_core::time::elapsed_secs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::progress::SessionProgress;
use crate::error::SessionError;

//
// ─── PHASES & EVENTS ───────────────────────────────────────────────────────────
//

/// Where the attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Waiting for an answer to the current question.
    Testing,
    /// Current question answered; waiting for `advance`.
    Reviewing,
    NoHeartsInterrupt,
    MistakeReview,
    SuccessCelebration,
    Results,
    AdInterstitial,
    Closed,
}

/// Fire-and-forget signals for subsystems outside the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    UnitApproved { unit_id: UnitId },
    FinalTestPassed { curriculum_id: CurriculumId },
    HeartsDepleted,
    StreakReached { count: u32 },
}

/// Who and what the session is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
    pub curriculum_id: CurriculumId,
    pub passing_score: u8,
    pub xp_reward: u32,
}

/// What `begin_answer` decided.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerGate {
    /// Grade this question; a request is now in flight.
    Proceed(Question),
    /// Question was answered before; nothing changes.
    AlreadyAnswered(AnswerOutcome),
}

/// Result of submitting one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub question_id: QuestionId,
    pub is_correct: bool,
    pub hearts_balance: u32,
    pub phase: SessionPhase,
    /// True when this call was a no-op resubmission.
    pub duplicate: bool,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// State machine for one test attempt.
///
/// Network work (grading, hearts, persistence) happens outside; this type only
/// validates transitions and records their effects. At most one answer may be
/// in flight at a time.
pub struct TestSession {
    context: SessionContext,
    attempt: TestAttempt,
    settings: SessionSettings,
    hearts: HeartsLedger,
    phase: SessionPhase,
    streak: u32,
    streak_overlay: Option<u32>,
    streak_timer: Option<TimerToken>,
    unique_wrong: HashSet<QuestionId>,
    mistake_review_shown: bool,
    timers: OverlayTimers,
    question_started_at: DateTime<Utc>,
    in_flight: Option<QuestionId>,
    depletion_pending: bool,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<AttemptResult>,
    result_recorded: bool,
    result_events: Vec<SessionEvent>,
    events: Vec<SessionEvent>,
}

impl TestSession {
    /// Starts a fresh attempt at its first question.
    #[must_use]
    pub fn new(
        context: SessionContext,
        attempt: TestAttempt,
        settings: SessionSettings,
        hearts: HeartsLedger,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::resume(context, attempt, settings, hearts, started_at)
    }

    /// Re-enters a partially answered attempt at its first unanswered question.
    ///
    /// Streak and unique mistakes are rebuilt from the stored answers. A scored
    /// attempt re-entered without hearts starts in `NoHeartsInterrupt`.
    #[must_use]
    pub fn resume(
        context: SessionContext,
        attempt: TestAttempt,
        settings: SessionSettings,
        hearts: HeartsLedger,
        now: DateTime<Utc>,
    ) -> Self {
        let answered: Vec<(QuestionId, bool)> = attempt
            .questions()
            .iter()
            .filter_map(|q| attempt.answers().get(&q.id()).map(|r| (q.id(), r.is_correct)))
            .collect();
        let unique_wrong = answered
            .iter()
            .filter(|(_, correct)| !correct)
            .map(|(id, _)| *id)
            .collect();
        let streak = answered.iter().rev().take_while(|(_, correct)| *correct).count();
        let mistake_review_shown =
            answered.iter().filter(|(_, c)| !c).count() > settings.mistake_threshold() as usize;
        let phase = if attempt.mode() == AttemptMode::Scored && !hearts.can_start_attempt() {
            info!(attempt = %attempt.id(), "re-entered without hearts");
            SessionPhase::NoHeartsInterrupt
        } else {
            SessionPhase::Testing
        };

        Self {
            context,
            attempt,
            settings,
            hearts,
            phase,
            streak: u32::try_from(streak).unwrap_or(u32::MAX),
            streak_overlay: None,
            streak_timer: None,
            unique_wrong,
            mistake_review_shown,
            timers: OverlayTimers::new(),
            question_started_at: now,
            in_flight: None,
            depletion_pending: false,
            started_at: now,
            completed_at: None,
            result: None,
            result_recorded: false,
            result_events: Vec::new(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn context(&self) -> SessionContext {
        self.context
    }

    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt.id()
    }

    #[must_use]
    pub fn target(&self) -> AttemptTarget {
        self.attempt.target()
    }

    #[must_use]
    pub fn attempt(&self) -> &TestAttempt {
        &self.attempt
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn hearts(&self) -> &HeartsLedger {
        &self.hearts
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.attempt.current_question()
    }

    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Streak count shown by the non-blocking overlay, while it is up.
    #[must_use]
    pub fn streak_overlay(&self) -> Option<u32> {
        self.streak_overlay
    }

    #[must_use]
    pub fn unique_wrong_count(&self) -> usize {
        self.unique_wrong.len()
    }

    #[must_use]
    pub fn is_request_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn result(&self) -> Option<&AttemptResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn is_result_recorded(&self) -> bool {
        self.result_recorded
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn next_timer_due(&self) -> Option<DateTime<Utc>> {
        self.timers.next_due()
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let total = self.attempt.total_questions();
        let answered = self.attempt.answers().len();
        SessionProgress {
            total,
            answered,
            remaining: total.saturating_sub(answered),
            correct: self.attempt.correct_count(),
            unique_wrong: self.unique_wrong.len(),
            streak: self.streak,
            is_complete: self.result.is_some(),
        }
    }

    /// Takes the events emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ─── Answering ─────────────────────────────────────────────────────────

    /// Claims the in-flight slot for answering `question_id`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed`, `RequestInFlight`, `NotAccepting`,
    /// `NotCurrentQuestion`, or an unknown-question attempt error.
    pub fn begin_answer(&mut self, question_id: QuestionId) -> Result<AnswerGate, SessionError> {
        if self.phase == SessionPhase::Closed {
            return Err(SessionError::Closed);
        }
        if self.in_flight.is_some() {
            return Err(SessionError::RequestInFlight);
        }
        let Some(question) = self.attempt.question(question_id).cloned() else {
            return Err(AttemptError::UnknownQuestion(question_id).into());
        };
        if let Some(record) = self.attempt.answers().get(&question_id) {
            debug!(%question_id, "ignoring resubmission");
            return Ok(AnswerGate::AlreadyAnswered(AnswerOutcome {
                question_id,
                is_correct: record.is_correct,
                hearts_balance: self.hearts.balance(),
                phase: self.phase,
                duplicate: true,
            }));
        }
        if self.phase != SessionPhase::Testing {
            return Err(SessionError::NotAccepting(self.phase));
        }
        if self.attempt.current_question().map(Question::id) != Some(question_id) {
            return Err(SessionError::NotCurrentQuestion(question_id));
        }

        self.in_flight = Some(question_id);
        Ok(AnswerGate::Proceed(question))
    }

    /// Releases the in-flight slot without recording anything.
    pub fn abandon_answer(&mut self) {
        self.in_flight = None;
    }

    /// Builds the record for the in-flight answer, timing it against `now`.
    #[must_use]
    pub fn answer_record(&self, answer: Answer, is_correct: bool, now: DateTime<Utc>) -> AnswerRecord {
        AnswerRecord {
            answer,
            is_correct,
            time_spent_secs: elapsed_secs(self.question_started_at, now),
        }
    }

    /// Optimistic one-heart debit for a wrong answer.
    ///
    /// `Ok(None)` for practice attempts and unlimited accounts.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoRequestInFlight` outside an answer, or a
    /// hearts error if another mutation is pending.
    pub fn begin_debit(&mut self) -> Result<Option<HeartsRequest>, SessionError> {
        if self.in_flight.is_none() {
            return Err(SessionError::NoRequestInFlight);
        }
        if self.attempt.mode() == AttemptMode::Practice {
            return Ok(None);
        }
        Ok(self.hearts.begin_debit(1)?)
    }

    /// # Errors
    ///
    /// Returns a hearts error if no debit is pending.
    pub fn confirm_debit(&mut self, balance: u32) -> Result<HeartsChange, SessionError> {
        let change = self.hearts.confirm(balance)?;
        if change.depleted {
            self.depletion_pending = true;
        }
        Ok(change)
    }

    /// Records the graded answer and releases the in-flight slot.
    ///
    /// Running out of hearts moves the session to `NoHeartsInterrupt`; the
    /// answer itself is kept.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoRequestInFlight` unless `question_id` was claimed
    /// by `begin_answer`.
    pub fn finish_answer(
        &mut self,
        question_id: QuestionId,
        record: AnswerRecord,
    ) -> Result<AnswerOutcome, SessionError> {
        if self.in_flight != Some(question_id) {
            return Err(SessionError::NoRequestInFlight);
        }
        let is_correct = record.is_correct;
        self.attempt.record_answer(question_id, record)?;
        self.in_flight = None;

        if is_correct {
            self.streak = self.streak.saturating_add(1);
        } else {
            self.streak = 0;
            self.unique_wrong.insert(question_id);
        }

        self.phase = SessionPhase::Reviewing;
        if std::mem::take(&mut self.depletion_pending) {
            info!(attempt = %self.attempt.id(), "out of hearts");
            self.events.push(SessionEvent::HeartsDepleted);
            self.phase = SessionPhase::NoHeartsInterrupt;
        }

        Ok(AnswerOutcome {
            question_id,
            is_correct,
            hearts_balance: self.hearts.balance(),
            phase: self.phase,
            duplicate: false,
        })
    }

    // ─── Progression ───────────────────────────────────────────────────────

    /// Moves past the answered question.
    ///
    /// Hitting a multiple of the streak threshold raises the streak overlay
    /// without pausing. Crossing the mistake threshold pauses for review once.
    /// Running off the end computes the result; a perfect score shows the
    /// success celebration before results.
    ///
    /// Out of hearts on the last question, the learner may still move on to
    /// the results; there is nothing left to answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotAnswered` if the current question has no answer
    /// yet, or `NotAccepting` from any phase other than `Reviewing`.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<SessionPhase, SessionError> {
        match self.phase {
            SessionPhase::Reviewing => {}
            SessionPhase::NoHeartsInterrupt if self.on_answered_last_question() => {}
            SessionPhase::Testing => return Err(SessionError::NotAnswered),
            SessionPhase::Closed => return Err(SessionError::Closed),
            other => return Err(SessionError::NotAccepting(other)),
        }

        let streak_hit = self.last_answer_correct()
            && self.streak > 0
            && self.streak % self.settings.streak_threshold() == 0;

        self.attempt.advance();
        self.question_started_at = now;

        if self.attempt.is_exhausted() {
            self.complete(now);
            let perfect = self.result.as_ref().is_some_and(AttemptResult::is_perfect);
            if perfect {
                self.clear_streak_overlay();
                self.phase = SessionPhase::SuccessCelebration;
                self.timers.schedule(
                    OverlayKind::SuccessCelebration,
                    now + self.settings.success_overlay(),
                );
                return Ok(self.phase);
            }
            self.phase = SessionPhase::Results;
        } else if self.unique_wrong.len() > self.settings.mistake_threshold() as usize
            && !self.mistake_review_shown
        {
            self.mistake_review_shown = true;
            self.phase = SessionPhase::MistakeReview;
        } else {
            self.phase = SessionPhase::Testing;
        }

        if streak_hit {
            self.raise_streak_overlay(now);
        }
        Ok(self.phase)
    }

    /// Leaves the mistake review and continues with the next question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotAccepting` outside `MistakeReview`.
    pub fn dismiss_mistake_review(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.phase != SessionPhase::MistakeReview {
            return Err(SessionError::NotAccepting(self.phase));
        }
        self.phase = SessionPhase::Testing;
        self.question_started_at = now;
        Ok(())
    }

    /// Adopts a refreshed hearts balance while interrupted.
    ///
    /// With hearts available again the learner is back where the interrupt
    /// hit: on the answered question ready to advance, or on the unanswered
    /// one a resumed attempt stopped at.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotAccepting` outside `NoHeartsInterrupt`.
    pub fn resolve_no_hearts(&mut self, snapshot: HeartsSnapshot) -> Result<SessionPhase, SessionError> {
        if self.phase != SessionPhase::NoHeartsInterrupt {
            return Err(SessionError::NotAccepting(self.phase));
        }
        self.hearts.reconcile(snapshot);
        if self.hearts.can_start_attempt() {
            self.phase = if self.current_answered() {
                SessionPhase::Reviewing
            } else {
                SessionPhase::Testing
            };
        }
        Ok(self.phase)
    }

    /// Hearts ledger access for credit flows driven from outside.
    pub(crate) fn hearts_mut(&mut self) -> &mut HeartsLedger {
        &mut self.hearts
    }

    /// Ends the success celebration early.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotAccepting` outside `SuccessCelebration`.
    pub fn dismiss_celebration(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::SuccessCelebration {
            return Err(SessionError::NotAccepting(self.phase));
        }
        self.timers.cancel_kind(OverlayKind::SuccessCelebration);
        self.phase = SessionPhase::Results;
        Ok(())
    }

    /// Leaves the results screen, through the ad interstitial when configured
    /// and the attempt passed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotAccepting` outside `Results`.
    pub fn leave_results(&mut self, now: DateTime<Utc>) -> Result<SessionPhase, SessionError> {
        if self.phase != SessionPhase::Results {
            return Err(SessionError::NotAccepting(self.phase));
        }
        let passed = self.result.as_ref().is_some_and(|r| r.passed);
        match self.settings.ad_interstitial() {
            Some(ad) if passed => {
                self.phase = SessionPhase::AdInterstitial;
                self.timers.schedule(
                    OverlayKind::AdInterstitial,
                    now + chrono::Duration::seconds(i64::from(ad.duration_secs)),
                );
            }
            _ => self.close(),
        }
        Ok(self.phase)
    }

    /// Fires overlay timers that are due at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<OverlayKind> {
        let due = self.timers.take_due(now);
        let mut fired = Vec::with_capacity(due.len());
        for overlay in due {
            match overlay.kind {
                OverlayKind::Streak => {
                    self.streak_overlay = None;
                    self.streak_timer = None;
                }
                OverlayKind::SuccessCelebration => {
                    if self.phase == SessionPhase::SuccessCelebration {
                        self.phase = SessionPhase::Results;
                    }
                }
                OverlayKind::AdInterstitial => {
                    if self.phase == SessionPhase::AdInterstitial {
                        self.close();
                    }
                }
            }
            fired.push(overlay.kind);
        }
        fired
    }

    /// Exits the attempt. Safe from any phase and idempotent.
    ///
    /// Spent hearts stay spent and nothing is approved by closing.
    pub fn close(&mut self) {
        let cancelled = self.timers.cancel_all();
        if self.phase != SessionPhase::Closed {
            debug!(attempt = %self.attempt.id(), cancelled, "session closed");
        }
        self.in_flight = None;
        self.streak_overlay = None;
        self.streak_timer = None;
        self.phase = SessionPhase::Closed;
    }

    // ─── Results ───────────────────────────────────────────────────────────

    /// Marks the computed result as stored and releases its events.
    pub(crate) fn mark_result_recorded(&mut self) {
        if !self.result_recorded {
            self.result_recorded = true;
            self.events.append(&mut self.result_events);
        }
    }

    fn complete(&mut self, now: DateTime<Utc>) {
        let mut result = AttemptResult::from_attempt(
            &self.attempt,
            self.context.passing_score,
            self.context.xp_reward,
        );
        result.unique_wrong = u32::try_from(self.unique_wrong.len()).unwrap_or(u32::MAX);

        if result.passed {
            self.result_events.push(match result.target {
                AttemptTarget::Unit(unit_id) => SessionEvent::UnitApproved { unit_id },
                AttemptTarget::FinalTest => SessionEvent::FinalTestPassed {
                    curriculum_id: self.context.curriculum_id,
                },
            });
        }
        info!(
            attempt = %self.attempt.id(),
            target = %result.target,
            score = result.score,
            passed = result.passed,
            "attempt completed"
        );
        self.completed_at = Some(now);
        self.result = Some(result);
    }

    fn current_answered(&self) -> bool {
        self.attempt
            .current_question()
            .is_some_and(|q| self.attempt.is_answered(q.id()))
    }

    fn on_answered_last_question(&self) -> bool {
        self.current_answered() && self.attempt.cursor() + 1 == self.attempt.total_questions()
    }

    fn last_answer_correct(&self) -> bool {
        self.attempt
            .current_question()
            .and_then(|q| self.attempt.answers().get(&q.id()))
            .is_some_and(|r| r.is_correct)
    }

    fn raise_streak_overlay(&mut self, now: DateTime<Utc>) {
        self.clear_streak_overlay();
        self.streak_overlay = Some(self.streak);
        self.events.push(SessionEvent::StreakReached { count: self.streak });
        self.streak_timer = Some(
            self.timers
                .schedule(OverlayKind::Streak, now + self.settings.streak_overlay()),
        );
    }

    fn clear_streak_overlay(&mut self) {
        if let Some(token) = self.streak_timer.take() {
            self.timers.cancel(token);
        }
        self.streak_overlay = None;
    }
}

impl fmt::Debug for TestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSession")
            .field("attempt_id", &self.attempt.id())
            .field("target", &self.attempt.target())
            .field("phase", &self.phase)
            .field("cursor", &self.attempt.cursor())
            .field("questions_len", &self.attempt.total_questions())
            .field("hearts", &self.hearts.balance())
            .field("streak", &self.streak)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use learnpath_core::hearts::{HeartsLedger, HeartsSnapshot};
use learnpath_core::model::{
    Answer, AttemptMode, AttemptResult, AttemptTarget, CurriculumId, QuestionId, SessionSettings,
    TestAttempt, UserId,
};
use learnpath_core::overlay::OverlayKind;
use storage::repository::{CurriculumRepository, ProgressStore, QuestionSource, Storage};
use tracing::{debug, info, warn};

use super::queries::SessionQueries;
use super::service::{AnswerGate, AnswerOutcome, SessionContext, SessionPhase, TestSession};
use crate::Clock;
use crate::error::SessionError;
use crate::events::{EventSink, NoopEventSink};

/// Outcome of asking to start an attempt.
#[derive(Debug)]
pub enum SessionStart {
    Started(TestSession),
    /// Scored attempt refused at zero hearts; no attempt was created.
    NoHearts(HeartsSnapshot),
}

/// Drives a `TestSession` against the remote collaborators.
#[derive(Clone)]
pub struct TestSessionLoop {
    clock: Clock,
    settings: SessionSettings,
    curricula: Arc<dyn CurriculumRepository>,
    progress: Arc<dyn ProgressStore>,
    questions: Arc<dyn QuestionSource>,
    events: Arc<dyn EventSink>,
}

impl TestSessionLoop {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            settings: SessionSettings::default(),
            curricula: Arc::clone(&storage.curricula),
            progress: Arc::clone(&storage.progress),
            questions: Arc::clone(&storage.questions),
            events: Arc::new(NoopEventSink),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start an attempt at `target` if the path allows it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownTarget` or `TargetLocked` when the target
    /// cannot be attempted, or storage errors.
    pub async fn start(
        &self,
        user: UserId,
        curriculum_id: CurriculumId,
        target: AttemptTarget,
        mode: AttemptMode,
    ) -> Result<SessionStart, SessionError> {
        let loaded = SessionQueries::load_path(
            user,
            curriculum_id,
            self.curricula.as_ref(),
            self.progress.as_ref(),
        )
        .await?;
        let (passing_score, xp_reward) =
            SessionQueries::grading_for(&loaded.curriculum, target, &self.settings)?;
        if !loaded.path_map(None).is_clickable(target) {
            return Err(SessionError::TargetLocked(target));
        }

        let snapshot = self.progress.get_hearts(user).await?;
        let hearts = HeartsLedger::from_snapshot(snapshot);
        if mode == AttemptMode::Scored && !hearts.can_start_attempt() {
            info!(%user, %target, "refusing scored attempt without hearts");
            return Ok(SessionStart::NoHearts(snapshot));
        }

        let issued = self
            .questions
            .start_attempt(user, curriculum_id, target, mode)
            .await?;
        let attempt = TestAttempt::new(issued.attempt_id, target, mode, issued.questions)?;
        info!(
            %user,
            %target,
            attempt = %attempt.id(),
            questions = attempt.total_questions(),
            "attempt started"
        );

        let context = SessionContext {
            user_id: user,
            curriculum_id,
            passing_score,
            xp_reward,
        };
        Ok(SessionStart::Started(TestSession::new(
            context,
            attempt,
            self.settings.clone(),
            hearts,
            self.clock.now(),
        )))
    }

    /// Grade, pay for (when wrong), and persist one answer.
    ///
    /// Resubmitting an answered question returns the stored outcome without
    /// grading or debiting again. The heart is debited before the answer is
    /// saved, and a failed save refunds it, so the store never keeps an answer
    /// nobody paid for. On any collaborator failure the answer is not
    /// recorded, the local hearts balance is restored, and the call can be
    /// retried. Dropping the future mid-call releases the question the same
    /// way.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` for rejected transitions or storage failures.
    pub async fn submit_answer(
        &self,
        session: &mut TestSession,
        question_id: QuestionId,
        answer: Answer,
    ) -> Result<AnswerOutcome, SessionError> {
        let question = match session.begin_answer(question_id)? {
            AnswerGate::Proceed(question) => question,
            AnswerGate::AlreadyAnswered(outcome) => return Ok(outcome),
        };
        let mut pending = PendingAnswer::new(session);

        let is_correct = match self.questions.grade_answer(&question, &answer).await {
            Ok(is_correct) => is_correct,
            Err(err) => {
                warn!(%question_id, error = %err, "grading failed");
                return Err(err.into());
            }
        };

        let record = pending.answer_record(answer, is_correct, self.clock.now());
        let debit = if is_correct {
            None
        } else {
            self.charge_mistake(&mut pending).await?
        };

        if let Err(err) = self
            .questions
            .save_answer(pending.attempt_id(), question_id, &record)
            .await
        {
            warn!(%question_id, error = %err, "saving answer failed");
            if let Some(charge) = debit {
                self.refund(pending.context().user_id, charge.amount).await;
            }
            return Err(err.into());
        }

        if let Some(charge) = debit {
            pending.confirm_debit(charge.balance)?;
        }
        let outcome = pending.finish_answer(question_id, record)?;
        pending.settle();

        debug!(
            %question_id,
            is_correct,
            hearts = outcome.hearts_balance,
            phase = ?outcome.phase,
            "answer recorded"
        );
        self.flush_events(session);
        Ok(outcome)
    }

    /// Debits the store for a wrong answer; the local debit stays unconfirmed
    /// until the answer is saved.
    async fn charge_mistake(
        &self,
        session: &mut TestSession,
    ) -> Result<Option<Charge>, SessionError> {
        let Some(request) = session.begin_debit()? else {
            return Ok(None);
        };
        let user = session.context().user_id;
        let amount = request.mutation.amount();
        match self.progress.debit_hearts(user, amount).await {
            Ok(balance) => Ok(Some(Charge { amount, balance })),
            Err(err) => {
                warn!(%user, error = %err, "hearts debit failed, rolling back");
                Err(err.into())
            }
        }
    }

    async fn refund(&self, user: UserId, amount: u32) {
        match self.progress.credit_hearts(user, amount).await {
            Ok(balance) => debug!(%user, amount, balance, "refunded hearts for unsaved answer"),
            Err(err) => {
                warn!(%user, amount, error = %err, "hearts refund failed, store balance is short");
            }
        }
    }

    /// Move past the answered question, storing the result when the attempt ends.
    ///
    /// If storing the result fails the session still shows its results; call
    /// [`TestSessionLoop::finalize_result`] to retry.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` for rejected transitions or storage failures.
    pub async fn advance(&self, session: &mut TestSession) -> Result<SessionPhase, SessionError> {
        let phase = session.advance(self.clock.now())?;
        self.flush_events(session);
        if session.result().is_some() {
            self.finalize_result(session).await?;
        }
        Ok(phase)
    }

    /// Retry result persistence after a completed attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotComplete` if the attempt has no result yet.
    /// Returns `SessionError::Storage` if persistence fails.
    pub async fn finalize_result(
        &self,
        session: &mut TestSession,
    ) -> Result<AttemptResult, SessionError> {
        let result = session.result().cloned().ok_or(SessionError::NotComplete)?;
        if session.is_result_recorded() {
            return Ok(result);
        }

        self.progress
            .record_attempt_result(session.attempt_id(), &result)
            .await?;
        session.mark_result_recorded();
        self.flush_events(session);
        Ok(result)
    }

    /// Re-read the balance from the store to leave the no-hearts interrupt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotAccepting` outside the interrupt, or storage errors.
    pub async fn refill_hearts(&self, session: &mut TestSession) -> Result<SessionPhase, SessionError> {
        if session.phase() != SessionPhase::NoHeartsInterrupt {
            return Err(SessionError::NotAccepting(session.phase()));
        }
        let snapshot = self.progress.get_hearts(session.context().user_id).await?;
        session.resolve_no_hearts(snapshot)
    }

    /// Grant hearts (e.g. a rewarded action) and resume if interrupted.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Hearts` if another mutation is pending, or storage
    /// errors after rolling the optimistic credit back. Dropping the future
    /// mid-call rolls it back too.
    pub async fn credit_hearts(
        &self,
        session: &mut TestSession,
        amount: u32,
    ) -> Result<u32, SessionError> {
        let user = session.context().user_id;
        let Some(_request) = session.hearts_mut().begin_credit(amount)? else {
            return Ok(session.hearts().balance());
        };
        let mut pending = PendingAnswer::new(session);
        let balance = match self.progress.credit_hearts(user, amount).await {
            Ok(balance) => balance,
            Err(err) => {
                warn!(%user, error = %err, "hearts credit failed, rolling back");
                return Err(err.into());
            }
        };
        pending.hearts_mut().confirm(balance)?;
        pending.settle();

        if session.phase() == SessionPhase::NoHeartsInterrupt {
            session.resolve_no_hearts(HeartsSnapshot {
                balance,
                unlimited: session.hearts().is_unlimited(),
            })?;
        }
        Ok(balance)
    }

    /// Fire overlay timers due by now.
    pub fn tick(&self, session: &mut TestSession) -> Vec<OverlayKind> {
        let fired = session.tick(self.clock.now());
        self.flush_events(session);
        fired
    }

    fn flush_events(&self, session: &mut TestSession) {
        for event in session.drain_events() {
            self.events.emit(&event);
        }
    }
}

/// Store-confirmed debit still awaiting the answer's save.
#[derive(Debug, Clone, Copy)]
struct Charge {
    amount: u32,
    balance: u32,
}

/// Borrow of a session with a request outstanding.
///
/// Unless settled, dropping it rolls back any unconfirmed hearts mutation and
/// releases the in-flight slot. This covers early error returns as well as a
/// caller that stops polling, e.g. on a timeout.
struct PendingAnswer<'a> {
    session: &'a mut TestSession,
    settled: bool,
}

impl<'a> PendingAnswer<'a> {
    fn new(session: &'a mut TestSession) -> Self {
        Self {
            session,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Deref for PendingAnswer<'_> {
    type Target = TestSession;

    fn deref(&self) -> &TestSession {
        self.session
    }
}

impl DerefMut for PendingAnswer<'_> {
    fn deref_mut(&mut self) -> &mut TestSession {
        self.session
    }
}

impl Drop for PendingAnswer<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.session.hearts().is_pending() {
            match self.session.hearts_mut().rollback() {
                Ok(balance) => debug!(balance, "rolled back unconfirmed hearts mutation"),
                Err(err) => warn!(error = %err, "hearts rollback failed"),
            }
        }
        if self.session.is_request_in_flight() {
            debug!(attempt = %self.session.attempt_id(), "released unfinished answer");
            self.session.abandon_answer();
        }
    }
}

use std::sync::Arc;

use learnpath_core::hearts::HeartsLedger;
use learnpath_core::model::{AttemptId, AttemptTarget, Curriculum, SessionSettings, Unit, UserId};
use storage::repository::{AttemptRecord, ProgressStore, QuestionSource, Storage};
use tracing::{debug, warn};

use super::queries::SessionQueries;
use super::service::{SessionContext, TestSession};
use crate::Clock;

/// An interrupted attempt brought back to life.
#[derive(Debug)]
pub struct ResumedAttempt {
    pub target: AttemptTarget,
    /// The unit being retaken; `None` for the final test.
    pub unit: Option<Unit>,
    pub session: TestSession,
}

/// Maps an external attempt reference back onto the curriculum.
///
/// Lookups only read, so calling `resume` twice for the same reference never
/// creates a second attempt. Anything unexpected fails closed: the caller gets
/// `None` and starts fresh.
#[derive(Clone)]
pub struct ResumeController {
    clock: Clock,
    settings: SessionSettings,
    progress: Arc<dyn ProgressStore>,
    questions: Arc<dyn QuestionSource>,
}

impl ResumeController {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            settings: SessionSettings::default(),
            progress: Arc::clone(&storage.progress),
            questions: Arc::clone(&storage.questions),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn resume(
        &self,
        user: UserId,
        attempt_ref: AttemptId,
        curriculum: &Curriculum,
    ) -> Option<ResumedAttempt> {
        let record = match self.questions.load_attempt(attempt_ref).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(attempt = %attempt_ref, "no attempt to resume");
                return None;
            }
            Err(err) => {
                warn!(attempt = %attempt_ref, error = %err, "attempt lookup failed");
                return None;
            }
        };
        if !Self::belongs_to(&record, user, curriculum) {
            warn!(attempt = %attempt_ref, "attempt belongs elsewhere");
            return None;
        }
        if record.finished {
            debug!(attempt = %attempt_ref, "attempt already finished");
            return None;
        }

        let target = record.target;
        let unit = match target {
            AttemptTarget::Unit(id) => match curriculum.unit(id) {
                Some(unit) => Some(unit.clone()),
                None => {
                    warn!(attempt = %attempt_ref, unit = %id, "unit no longer in curriculum");
                    return None;
                }
            },
            AttemptTarget::FinalTest => None,
        };
        let (passing_score, xp_reward) =
            SessionQueries::grading_for(curriculum, target, &self.settings).ok()?;

        let attempt = match record.into_attempt() {
            Ok(attempt) => attempt,
            Err(err) => {
                warn!(attempt = %attempt_ref, error = %err, "stored attempt is inconsistent");
                return None;
            }
        };
        if attempt.is_exhausted() {
            debug!(attempt = %attempt_ref, "every question already answered");
            return None;
        }

        let snapshot = match self.progress.get_hearts(user).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%user, error = %err, "hearts lookup failed during resume");
                return None;
            }
        };

        let context = SessionContext {
            user_id: user,
            curriculum_id: curriculum.id(),
            passing_score,
            xp_reward,
        };
        let session = TestSession::resume(
            context,
            attempt,
            self.settings.clone(),
            HeartsLedger::from_snapshot(snapshot),
            self.clock.now(),
        );
        debug!(
            attempt = %attempt_ref,
            %target,
            cursor = session.attempt().cursor(),
            "attempt resumed"
        );
        Some(ResumedAttempt {
            target,
            unit,
            session,
        })
    }

    fn belongs_to(record: &AttemptRecord, user: UserId, curriculum: &Curriculum) -> bool {
        record.user_id == user && record.curriculum_id == curriculum.id()
    }
}

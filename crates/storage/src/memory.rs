use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use learnpath_core::hearts::HeartsSnapshot;
use learnpath_core::model::{
    Answer, AnswerRecord, AttemptId, AttemptMode, AttemptResult, AttemptTarget, Curriculum,
    CurriculumId, Question, QuestionId, UnitId, UserId,
};
use tracing::debug;

use crate::repository::{
    AttemptRecord, CurriculumRepository, IssuedAttempt, ProgressStore, QuestionSource,
    StorageError,
};

/// Balance handed to learners the store has never seen.
pub const DEFAULT_HEARTS: u32 = 5;

/// Operations whose next call can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    GetApproved,
    GetHearts,
    Debit,
    Credit,
    RecordResult,
    StartAttempt,
    Grade,
    SaveAnswer,
    LoadAttempt,
}

#[derive(Default)]
struct State {
    curricula: HashMap<CurriculumId, Curriculum>,
    banks: HashMap<(CurriculumId, AttemptTarget), Vec<Question>>,
    approved: HashMap<(UserId, CurriculumId), HashSet<UnitId>>,
    final_passed: HashSet<(UserId, CurriculumId)>,
    hearts: HashMap<UserId, HeartsSnapshot>,
    attempts: HashMap<AttemptId, AttemptRecord>,
    results: Vec<(AttemptId, AttemptResult)>,
    failures: HashMap<FailPoint, StorageError>,
    stalls: HashSet<FailPoint>,
    debit_calls: usize,
}

impl State {
    fn check(&mut self, point: FailPoint) -> Result<(), StorageError> {
        match self.failures.remove(&point) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn hearts_of(&self, user: UserId) -> HeartsSnapshot {
        self.hearts.get(&user).copied().unwrap_or(HeartsSnapshot {
            balance: DEFAULT_HEARTS,
            unlimited: false,
        })
    }
}

/// In-memory implementation of every collaborator contract, for tests and demos.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn insert_curriculum(&self, curriculum: Curriculum) -> Result<(), StorageError> {
        self.lock()?.curricula.insert(curriculum.id(), curriculum);
        Ok(())
    }

    /// Register the question list issued for attempts at `target`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn set_questions(
        &self,
        curriculum: CurriculumId,
        target: AttemptTarget,
        questions: Vec<Question>,
    ) -> Result<(), StorageError> {
        self.lock()?.banks.insert((curriculum, target), questions);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn set_hearts(&self, user: UserId, snapshot: HeartsSnapshot) -> Result<(), StorageError> {
        self.lock()?.hearts.insert(user, snapshot);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn approve(
        &self,
        user: UserId,
        curriculum: CurriculumId,
        units: impl IntoIterator<Item = UnitId>,
    ) -> Result<(), StorageError> {
        self.lock()?
            .approved
            .entry((user, curriculum))
            .or_default()
            .extend(units);
        Ok(())
    }

    /// Make the next call at `point` fail with `error`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn fail_next(&self, point: FailPoint, error: StorageError) -> Result<(), StorageError> {
        self.lock()?.failures.insert(point, error);
        Ok(())
    }

    /// Make the next call at `point` hang forever, like a request that never
    /// gets a response. Only grading, saving answers and hearts mutations stall.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn stall_next(&self, point: FailPoint) -> Result<(), StorageError> {
        self.lock()?.stalls.insert(point);
        Ok(())
    }

    async fn wait_if_stalled(&self, point: FailPoint) {
        let stalled = self
            .lock()
            .map(|mut guard| guard.stalls.remove(&point))
            .unwrap_or(false);
        if stalled {
            debug!(?point, "stalling call");
            std::future::pending::<()>().await;
        }
    }

    /// Number of debit requests that reached the store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn debit_calls(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.debit_calls)
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn attempt_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.attempts.len())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn recorded_results(&self) -> Result<Vec<(AttemptId, AttemptResult)>, StorageError> {
        Ok(self.lock()?.results.clone())
    }
}

#[async_trait]
impl CurriculumRepository for InMemoryRepository {
    async fn get_curriculum(&self, id: CurriculumId) -> Result<Curriculum, StorageError> {
        let guard = self.lock()?;
        guard.curricula.get(&id).cloned().ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ProgressStore for InMemoryRepository {
    async fn get_approved_unit_ids(
        &self,
        user: UserId,
        curriculum: CurriculumId,
    ) -> Result<HashSet<UnitId>, StorageError> {
        let mut guard = self.lock()?;
        guard.check(FailPoint::GetApproved)?;
        Ok(guard
            .approved
            .get(&(user, curriculum))
            .cloned()
            .unwrap_or_default())
    }

    async fn has_passed_final(
        &self,
        user: UserId,
        curriculum: CurriculumId,
    ) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        guard.check(FailPoint::GetApproved)?;
        Ok(guard.final_passed.contains(&(user, curriculum)))
    }

    async fn get_hearts(&self, user: UserId) -> Result<HeartsSnapshot, StorageError> {
        let mut guard = self.lock()?;
        guard.check(FailPoint::GetHearts)?;
        Ok(guard.hearts_of(user))
    }

    async fn debit_hearts(&self, user: UserId, amount: u32) -> Result<u32, StorageError> {
        self.wait_if_stalled(FailPoint::Debit).await;
        let mut guard = self.lock()?;
        guard.debit_calls += 1;
        guard.check(FailPoint::Debit)?;
        let mut snapshot = guard.hearts_of(user);
        if !snapshot.unlimited {
            snapshot.balance = snapshot.balance.saturating_sub(amount);
        }
        guard.hearts.insert(user, snapshot);
        debug!(%user, amount, balance = snapshot.balance, "hearts debited");
        Ok(snapshot.balance)
    }

    async fn credit_hearts(&self, user: UserId, amount: u32) -> Result<u32, StorageError> {
        self.wait_if_stalled(FailPoint::Credit).await;
        let mut guard = self.lock()?;
        guard.check(FailPoint::Credit)?;
        let mut snapshot = guard.hearts_of(user);
        snapshot.balance = snapshot.balance.saturating_add(amount);
        guard.hearts.insert(user, snapshot);
        Ok(snapshot.balance)
    }

    async fn record_attempt_result(
        &self,
        attempt_id: AttemptId,
        result: &AttemptResult,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.check(FailPoint::RecordResult)?;
        let (user, curriculum) = {
            let record = guard
                .attempts
                .get_mut(&attempt_id)
                .ok_or(StorageError::NotFound)?;
            record.finished = true;
            (record.user_id, record.curriculum_id)
        };

        if result.passed {
            match result.target {
                AttemptTarget::Unit(unit) => {
                    guard
                        .approved
                        .entry((user, curriculum))
                        .or_default()
                        .insert(unit);
                }
                AttemptTarget::FinalTest => {
                    guard.final_passed.insert((user, curriculum));
                }
            }
        }
        guard.results.push((attempt_id, result.clone()));
        Ok(())
    }
}

#[async_trait]
impl QuestionSource for InMemoryRepository {
    async fn start_attempt(
        &self,
        user: UserId,
        curriculum: CurriculumId,
        target: AttemptTarget,
        mode: AttemptMode,
    ) -> Result<IssuedAttempt, StorageError> {
        let mut guard = self.lock()?;
        guard.check(FailPoint::StartAttempt)?;
        let questions = guard
            .banks
            .get(&(curriculum, target))
            .cloned()
            .ok_or(StorageError::NotFound)?;

        let attempt_id = AttemptId::generate();
        guard.attempts.insert(
            attempt_id,
            AttemptRecord {
                attempt_id,
                user_id: user,
                curriculum_id: curriculum,
                target,
                mode,
                questions: questions.clone(),
                answers: HashMap::new(),
                finished: false,
            },
        );
        debug!(%attempt_id, %target, "issued attempt");
        Ok(IssuedAttempt {
            attempt_id,
            questions,
        })
    }

    async fn grade_answer(
        &self,
        question: &Question,
        answer: &Answer,
    ) -> Result<bool, StorageError> {
        self.wait_if_stalled(FailPoint::Grade).await;
        let mut guard = self.lock()?;
        guard.check(FailPoint::Grade)?;
        Ok(question.grade(answer))
    }

    async fn save_answer(
        &self,
        attempt_id: AttemptId,
        question_id: QuestionId,
        record: &AnswerRecord,
    ) -> Result<(), StorageError> {
        self.wait_if_stalled(FailPoint::SaveAnswer).await;
        let mut guard = self.lock()?;
        guard.check(FailPoint::SaveAnswer)?;
        let attempt = guard
            .attempts
            .get_mut(&attempt_id)
            .ok_or(StorageError::NotFound)?;
        attempt
            .answers
            .entry(question_id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn load_attempt(
        &self,
        attempt_id: AttemptId,
    ) -> Result<Option<AttemptRecord>, StorageError> {
        let mut guard = self.lock()?;
        guard.check(FailPoint::LoadAttempt)?;
        Ok(guard.attempts.get(&attempt_id).cloned())
    }
}

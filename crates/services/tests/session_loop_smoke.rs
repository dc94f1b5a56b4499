use std::sync::Arc;
use std::time::Duration;

use learnpath_core::hearts::HeartsSnapshot;
use learnpath_core::model::{
    Answer, AttemptMode, AttemptTarget, Curriculum, CurriculumId, FinalTest, Question, QuestionId,
    QuestionKind, Unit, UnitId, UserId,
};
use learnpath_core::progression::UnitState;
use learnpath_core::time::fixed_now;
use services::{
    Clock, CollectingEventSink, ProgressionService, SessionError, SessionEvent, SessionPhase,
    SessionStart, TestSession, TestSessionLoop,
};
use storage::{
    FailPoint, InMemoryRepository, ProgressStore, QuestionSource, Storage, StorageError,
};

const USER: UserId = UserId::new(7);
const CURRICULUM: CurriculumId = CurriculumId::new(1);

fn unit(id: u64, position: u32, mandatory: bool) -> Unit {
    Unit::new(UnitId::new(id), position, mandatory, format!("Unit {id}"), None).unwrap()
}

fn true_false(id: u64) -> Question {
    Question::new(
        QuestionId::new(id),
        format!("Statement {id}"),
        QuestionKind::TrueFalse { answer: true },
    )
    .unwrap()
}

struct Harness {
    repo: InMemoryRepository,
    storage: Storage,
    events: Arc<CollectingEventSink>,
    loop_svc: TestSessionLoop,
}

fn harness(questions: u64) -> Harness {
    let (storage, repo) = Storage::in_memory();
    let curriculum = Curriculum::new(
        CURRICULUM,
        "Spanish basics",
        vec![unit(1, 0, true), unit(2, 1, true), unit(3, 5, false)],
        Some(FinalTest::new("Final", 80, 50).unwrap()),
    )
    .unwrap();
    repo.insert_curriculum(curriculum).unwrap();
    for target in [
        AttemptTarget::Unit(UnitId::new(1)),
        AttemptTarget::Unit(UnitId::new(2)),
    ] {
        repo.set_questions(CURRICULUM, target, (1..=questions).map(true_false).collect())
            .unwrap();
    }

    let events = Arc::new(CollectingEventSink::new());
    let loop_svc =
        TestSessionLoop::new(Clock::fixed(fixed_now()), &storage).with_event_sink(events.clone());
    Harness {
        repo,
        storage,
        events,
        loop_svc,
    }
}

async fn start(h: &Harness, target: AttemptTarget, mode: AttemptMode) -> TestSession {
    match h.loop_svc.start(USER, CURRICULUM, target, mode).await.unwrap() {
        SessionStart::Started(session) => session,
        SessionStart::NoHearts(_) => panic!("expected a started session"),
    }
}

async fn answer_current(h: &Harness, session: &mut TestSession, correct: bool) {
    let id = session.current_question().unwrap().id();
    h.loop_svc
        .submit_answer(session, id, Answer::Boolean(correct))
        .await
        .unwrap();
}

#[tokio::test]
async fn eight_of_ten_approves_unit_and_unlocks_next() {
    let h = harness(10);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;

    for i in 0..10 {
        answer_current(&h, &mut session, i < 8).await;
        h.loop_svc.advance(&mut session).await.unwrap();
    }

    assert_eq!(session.phase(), SessionPhase::Results);
    let result = session.result().unwrap();
    assert_eq!(result.score, 80);
    assert!(result.passed);
    assert!(session.is_result_recorded());
    assert_eq!(session.hearts().balance(), 3);
    assert!(h.events.take().contains(&SessionEvent::UnitApproved {
        unit_id: UnitId::new(1)
    }));

    let map = ProgressionService::new(&h.storage)
        .path_map(USER, CURRICULUM)
        .await
        .unwrap();
    assert_eq!(map.state_of(UnitId::new(1)), Some(UnitState::Completed));
    assert_eq!(map.state_of(UnitId::new(2)), Some(UnitState::Available));
    assert_eq!(map.state_of(UnitId::new(3)), Some(UnitState::Available));
    assert_eq!(map.final_test, Some(UnitState::Locked));
}

#[tokio::test]
async fn failed_attempt_changes_nothing_on_the_path() {
    let h = harness(4);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;
    for _ in 0..4 {
        answer_current(&h, &mut session, false).await;
        h.loop_svc.advance(&mut session).await.unwrap();
    }
    assert!(!session.result().unwrap().passed);

    let map = ProgressionService::new(&h.storage)
        .path_map(USER, CURRICULUM)
        .await
        .unwrap();
    assert_eq!(map.state_of(UnitId::new(1)), Some(UnitState::Available));
    assert_eq!(map.state_of(UnitId::new(2)), Some(UnitState::Locked));
}

#[tokio::test]
async fn last_heart_interrupts_until_refilled() {
    let h = harness(3);
    h.repo
        .set_hearts(USER, HeartsSnapshot { balance: 1, unlimited: false })
        .unwrap();
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;

    let outcome = h
        .loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false))
        .await
        .unwrap();
    assert_eq!(outcome.hearts_balance, 0);
    assert_eq!(outcome.phase, SessionPhase::NoHeartsInterrupt);
    assert_eq!(h.events.take(), vec![SessionEvent::HeartsDepleted]);
    assert_eq!(h.repo.get_hearts(USER).await.unwrap().balance, 0);

    assert_eq!(
        h.loop_svc.refill_hearts(&mut session).await.unwrap(),
        SessionPhase::NoHeartsInterrupt
    );

    h.repo
        .set_hearts(USER, HeartsSnapshot { balance: 3, unlimited: false })
        .unwrap();
    assert_eq!(
        h.loop_svc.refill_hearts(&mut session).await.unwrap(),
        SessionPhase::Reviewing
    );
    assert!(session.attempt().is_answered(QuestionId::new(1)));
    assert_eq!(
        h.loop_svc.advance(&mut session).await.unwrap(),
        SessionPhase::Testing
    );
}

#[tokio::test]
async fn credit_resumes_interrupted_attempt() {
    let h = harness(3);
    h.repo
        .set_hearts(USER, HeartsSnapshot { balance: 1, unlimited: false })
        .unwrap();
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;
    answer_current(&h, &mut session, false).await;
    assert_eq!(session.phase(), SessionPhase::NoHeartsInterrupt);

    let balance = h.loop_svc.credit_hearts(&mut session, 1).await.unwrap();
    assert_eq!(balance, 1);
    assert_eq!(session.phase(), SessionPhase::Reviewing);
}

#[tokio::test]
async fn zero_hearts_blocks_scored_start_only() {
    let h = harness(3);
    h.repo
        .set_hearts(USER, HeartsSnapshot { balance: 0, unlimited: false })
        .unwrap();

    let start = h
        .loop_svc
        .start(USER, CURRICULUM, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored)
        .await
        .unwrap();
    assert!(matches!(start, SessionStart::NoHearts(snapshot) if snapshot.balance == 0));
    assert_eq!(h.repo.attempt_count().unwrap(), 0);

    let mut practice = start_practice(&h).await;
    answer_current(&h, &mut practice, false).await;
    assert_eq!(practice.hearts().balance(), 0);
    assert_eq!(h.repo.debit_calls().unwrap(), 0);
}

async fn start_practice(h: &Harness) -> TestSession {
    start(h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Practice).await
}

#[tokio::test]
async fn resubmitting_never_debits_twice() {
    let h = harness(3);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;

    for _ in 0..2 {
        h.loop_svc
            .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false))
            .await
            .unwrap();
    }

    assert_eq!(h.repo.debit_calls().unwrap(), 1);
    assert_eq!(session.hearts().balance(), 4);
    assert_eq!(h.repo.get_hearts(USER).await.unwrap().balance, 4);
}

#[tokio::test]
async fn debit_failure_leaves_session_untouched() {
    let h = harness(3);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;
    h.repo
        .fail_next(FailPoint::Debit, StorageError::Connection("timeout".into()))
        .unwrap();

    let err = h
        .loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(session.phase(), SessionPhase::Testing);
    assert_eq!(session.hearts().balance(), 5);
    assert!(!session.is_request_in_flight());
    assert!(!session.attempt().is_answered(QuestionId::new(1)));
    assert_eq!(h.repo.get_hearts(USER).await.unwrap().balance, 5);

    let outcome = h
        .loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false))
        .await
        .unwrap();
    assert_eq!(outcome.hearts_balance, 4);
    assert_eq!(h.repo.get_hearts(USER).await.unwrap().balance, 4);
}

#[tokio::test]
async fn failed_save_refunds_the_heart() {
    let h = harness(3);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;
    h.repo
        .fail_next(FailPoint::SaveAnswer, StorageError::Connection("reset".into()))
        .unwrap();

    let err = h
        .loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.repo.debit_calls().unwrap(), 1);
    assert_eq!(h.repo.get_hearts(USER).await.unwrap().balance, 5);
    assert_eq!(session.hearts().balance(), 5);
    assert!(!session.hearts().is_pending());
    assert!(!session.attempt().is_answered(QuestionId::new(1)));

    // The retry may carry a different answer; store and session agree on it.
    let outcome = h
        .loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(true))
        .await
        .unwrap();
    assert!(outcome.is_correct);
    assert_eq!(outcome.hearts_balance, 5);
    let stored = h
        .repo
        .load_attempt(session.attempt_id())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.answers[&QuestionId::new(1)].is_correct);
}

#[tokio::test]
async fn cancelled_submit_releases_the_question() {
    let h = harness(3);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;

    h.repo.stall_next(FailPoint::Grade).unwrap();
    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        h.loop_svc
            .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false)),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!session.is_request_in_flight());
    assert_eq!(session.phase(), SessionPhase::Testing);

    h.repo.stall_next(FailPoint::Debit).unwrap();
    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        h.loop_svc
            .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false)),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!session.is_request_in_flight());
    assert!(!session.hearts().is_pending());
    assert_eq!(session.hearts().balance(), 5);
    assert!(!session.attempt().is_answered(QuestionId::new(1)));

    let outcome = h
        .loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false))
        .await
        .unwrap();
    assert_eq!(outcome.hearts_balance, 4);
    assert_eq!(h.repo.get_hearts(USER).await.unwrap().balance, 4);
}

#[tokio::test]
async fn cancelled_credit_is_rolled_back() {
    let h = harness(3);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;

    h.repo.stall_next(FailPoint::Credit).unwrap();
    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        h.loop_svc.credit_hearts(&mut session, 2),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!session.hearts().is_pending());
    assert_eq!(session.hearts().balance(), 5);
    assert_eq!(h.loop_svc.credit_hearts(&mut session, 2).await.unwrap(), 7);
}

#[tokio::test]
async fn grading_failure_does_not_debit() {
    let h = harness(3);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;
    h.repo
        .fail_next(FailPoint::Grade, StorageError::Unavailable("grader down".into()))
        .unwrap();

    let err = h
        .loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Boolean(false))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Storage(StorageError::Unavailable(_))));
    assert_eq!(h.repo.debit_calls().unwrap(), 0);
    assert_eq!(session.phase(), SessionPhase::Testing);
}

#[tokio::test]
async fn locked_targets_cannot_be_started() {
    let h = harness(3);
    let err = h
        .loop_svc
        .start(USER, CURRICULUM, AttemptTarget::Unit(UnitId::new(2)), AttemptMode::Scored)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TargetLocked(_)));

    let err = h
        .loop_svc
        .start(USER, CURRICULUM, AttemptTarget::FinalTest, AttemptMode::Scored)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TargetLocked(AttemptTarget::FinalTest)));

    let err = h
        .loop_svc
        .start(USER, CURRICULUM, AttemptTarget::Unit(UnitId::new(99)), AttemptMode::Scored)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::UnknownTarget(_)));
}

#[tokio::test]
async fn result_recording_can_be_retried() {
    let h = harness(2);
    let mut session = start(&h, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored).await;
    answer_current(&h, &mut session, true).await;
    h.loop_svc.advance(&mut session).await.unwrap();
    answer_current(&h, &mut session, true).await;

    h.repo
        .fail_next(FailPoint::RecordResult, StorageError::Connection("reset".into()))
        .unwrap();
    let err = h.loop_svc.advance(&mut session).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(session.phase(), SessionPhase::SuccessCelebration);
    assert!(!session.is_result_recorded());
    assert!(h.events.take().is_empty());

    let result = h.loop_svc.finalize_result(&mut session).await.unwrap();
    assert_eq!(result.score, 100);
    assert!(session.is_result_recorded());
    assert_eq!(h.repo.recorded_results().unwrap().len(), 1);

    // Already stored: no second write.
    h.loop_svc.finalize_result(&mut session).await.unwrap();
    assert_eq!(h.repo.recorded_results().unwrap().len(), 1);
    assert_eq!(
        h.events.take(),
        vec![SessionEvent::UnitApproved {
            unit_id: UnitId::new(1)
        }]
    );
}

#[tokio::test]
async fn final_test_opens_after_mandatory_units() {
    let h = harness(2);
    h.repo
        .approve(USER, CURRICULUM, [UnitId::new(1), UnitId::new(2)])
        .unwrap();
    h.repo
        .set_questions(CURRICULUM, AttemptTarget::FinalTest, vec![true_false(1), true_false(2)])
        .unwrap();

    let mut session = start(&h, AttemptTarget::FinalTest, AttemptMode::Scored).await;
    answer_current(&h, &mut session, true).await;
    h.loop_svc.advance(&mut session).await.unwrap();
    answer_current(&h, &mut session, false).await;
    h.loop_svc.advance(&mut session).await.unwrap();

    let result = session.result().unwrap();
    assert_eq!(result.score, 50);
    assert_eq!(result.passing_score, 80);
    assert!(!result.passed);
    assert!(!h.repo.has_passed_final(USER, CURRICULUM).await.unwrap());
}

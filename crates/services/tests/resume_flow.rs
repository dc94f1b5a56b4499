use learnpath_core::hearts::HeartsSnapshot;
use learnpath_core::model::{
    Answer, AttemptMode, AttemptTarget, Curriculum, CurriculumId, FinalTest, Question, QuestionId,
    QuestionKind, Unit, UnitId, UserId,
};
use learnpath_core::time::fixed_now;
use services::{
    Clock, ResumeController, SessionError, SessionPhase, SessionStart, TestSession, TestSessionLoop,
};
use storage::{FailPoint, InMemoryRepository, Storage, StorageError};

const USER: UserId = UserId::new(3);
const CURRICULUM: CurriculumId = CurriculumId::new(2);

fn unit(id: u64, position: u32) -> Unit {
    Unit::new(UnitId::new(id), position, true, format!("Unit {id}"), None).unwrap()
}

fn fill_in(id: u64) -> Question {
    Question::new(
        QuestionId::new(id),
        format!("Translate {id}"),
        QuestionKind::FillInBlank {
            accepted: vec![format!("word {id}")],
        },
    )
    .unwrap()
}

fn curriculum(units: Vec<Unit>) -> Curriculum {
    Curriculum::new(
        CURRICULUM,
        "French",
        units,
        Some(FinalTest::new("Final", 80, 25).unwrap()),
    )
    .unwrap()
}

fn setup() -> (Storage, InMemoryRepository, TestSessionLoop, ResumeController) {
    let (storage, repo) = Storage::in_memory();
    repo.insert_curriculum(curriculum(vec![unit(1, 0), unit(2, 1)]))
        .unwrap();
    repo.set_questions(
        CURRICULUM,
        AttemptTarget::Unit(UnitId::new(1)),
        (1..=4).map(fill_in).collect(),
    )
    .unwrap();
    let clock = Clock::fixed(fixed_now());
    let loop_svc = TestSessionLoop::new(clock, &storage);
    let resume = ResumeController::new(clock, &storage);
    (storage, repo, loop_svc, resume)
}

async fn interrupted_attempt(loop_svc: &TestSessionLoop) -> TestSession {
    let SessionStart::Started(mut session) = loop_svc
        .start(USER, CURRICULUM, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored)
        .await
        .unwrap()
    else {
        panic!("expected a started session");
    };
    loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Text("Word 1".into()))
        .await
        .unwrap();
    loop_svc.advance(&mut session).await.unwrap();
    loop_svc
        .submit_answer(&mut session, QuestionId::new(2), Answer::Text("nope".into()))
        .await
        .unwrap();
    session
}

#[tokio::test]
async fn resume_reenters_at_first_unanswered_question() {
    let (_storage, repo, loop_svc, resume) = setup();
    let original = interrupted_attempt(&loop_svc).await;
    let attempt_ref = original.attempt_id();
    drop(original);

    let resumed = resume
        .resume(USER, attempt_ref, &curriculum(vec![unit(1, 0), unit(2, 1)]))
        .await
        .unwrap();
    assert_eq!(resumed.target, AttemptTarget::Unit(UnitId::new(1)));
    assert_eq!(resumed.unit.unwrap().id(), UnitId::new(1));

    let session = resumed.session;
    assert_eq!(session.phase(), SessionPhase::Testing);
    assert_eq!(session.current_question().unwrap().id(), QuestionId::new(3));
    assert_eq!(session.unique_wrong_count(), 1);
    assert_eq!(session.hearts().balance(), 4);

    // Resuming twice reads the same record and creates nothing.
    let again = resume
        .resume(USER, attempt_ref, &curriculum(vec![unit(1, 0), unit(2, 1)]))
        .await
        .unwrap();
    assert_eq!(again.session.attempt_id(), attempt_ref);
    assert_eq!(repo.attempt_count().unwrap(), 1);
}

#[tokio::test]
async fn resumed_attempt_can_be_finished() {
    let (_storage, repo, loop_svc, resume) = setup();
    let attempt_ref = interrupted_attempt(&loop_svc).await.attempt_id();

    let mut session = resume
        .resume(USER, attempt_ref, &curriculum(vec![unit(1, 0), unit(2, 1)]))
        .await
        .unwrap()
        .session;
    for id in 3..=4 {
        loop_svc
            .submit_answer(&mut session, QuestionId::new(id), Answer::Text(format!("word {id}")))
            .await
            .unwrap();
        loop_svc.advance(&mut session).await.unwrap();
    }

    let result = session.result().unwrap();
    assert_eq!(result.correct, 3);
    assert_eq!(result.score, 75);
    assert!(result.passed);
    assert_eq!(repo.recorded_results().unwrap().len(), 1);

    let after = resume
        .resume(USER, attempt_ref, &curriculum(vec![unit(1, 0), unit(2, 1)]))
        .await;
    assert!(after.is_none(), "finished attempts are not resumable");
}

#[tokio::test]
async fn resume_fails_closed_when_unit_was_removed() {
    let (_storage, _repo, loop_svc, resume) = setup();
    let attempt_ref = interrupted_attempt(&loop_svc).await.attempt_id();

    let resumed = resume
        .resume(USER, attempt_ref, &curriculum(vec![unit(2, 0)]))
        .await;
    assert!(resumed.is_none());
}

#[tokio::test]
async fn resume_fails_closed_for_unknown_or_foreign_attempts() {
    let (_storage, repo, loop_svc, resume) = setup();
    let attempt_ref = interrupted_attempt(&loop_svc).await.attempt_id();
    let units = curriculum(vec![unit(1, 0), unit(2, 1)]);

    assert!(
        resume
            .resume(USER, learnpath_core::model::AttemptId::generate(), &units)
            .await
            .is_none()
    );
    assert!(resume.resume(UserId::new(99), attempt_ref, &units).await.is_none());

    repo.fail_next(FailPoint::LoadAttempt, StorageError::Connection("offline".into()))
        .unwrap();
    assert!(resume.resume(USER, attempt_ref, &units).await.is_none());
    assert!(resume.resume(USER, attempt_ref, &units).await.is_some());
}

#[tokio::test]
async fn resume_without_hearts_stays_interrupted_until_refilled() {
    let (_storage, repo, loop_svc, resume) = setup();
    repo.set_hearts(USER, HeartsSnapshot { balance: 1, unlimited: false })
        .unwrap();
    let original = interrupted_attempt(&loop_svc).await;
    assert_eq!(original.phase(), SessionPhase::NoHeartsInterrupt);
    let attempt_ref = original.attempt_id();
    drop(original);

    let mut session = resume
        .resume(USER, attempt_ref, &curriculum(vec![unit(1, 0), unit(2, 1)]))
        .await
        .unwrap()
        .session;
    assert_eq!(session.phase(), SessionPhase::NoHeartsInterrupt);
    assert_eq!(session.hearts().balance(), 0);
    let err = loop_svc
        .submit_answer(&mut session, QuestionId::new(3), Answer::Text("nope".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotAccepting(SessionPhase::NoHeartsInterrupt)));
    assert_eq!(repo.debit_calls().unwrap(), 1);

    repo.set_hearts(USER, HeartsSnapshot { balance: 2, unlimited: false })
        .unwrap();
    assert_eq!(
        loop_svc.refill_hearts(&mut session).await.unwrap(),
        SessionPhase::Testing
    );
    let outcome = loop_svc
        .submit_answer(&mut session, QuestionId::new(3), Answer::Text("nope".into()))
        .await
        .unwrap();
    assert_eq!(outcome.phase, SessionPhase::Reviewing);
    assert_eq!(outcome.hearts_balance, 1);
}

#[tokio::test]
async fn failed_debit_leaves_nothing_to_resume() {
    let (_storage, repo, loop_svc, resume) = setup();
    let SessionStart::Started(mut session) = loop_svc
        .start(USER, CURRICULUM, AttemptTarget::Unit(UnitId::new(1)), AttemptMode::Scored)
        .await
        .unwrap()
    else {
        panic!("expected a started session");
    };
    repo.fail_next(FailPoint::Debit, StorageError::Connection("offline".into()))
        .unwrap();
    loop_svc
        .submit_answer(&mut session, QuestionId::new(1), Answer::Text("nope".into()))
        .await
        .unwrap_err();
    let attempt_ref = session.attempt_id();
    drop(session);

    let mut resumed = resume
        .resume(USER, attempt_ref, &curriculum(vec![unit(1, 0), unit(2, 1)]))
        .await
        .unwrap()
        .session;
    assert_eq!(resumed.current_question().unwrap().id(), QuestionId::new(1));
    assert_eq!(resumed.hearts().balance(), 5);

    let outcome = loop_svc
        .submit_answer(&mut resumed, QuestionId::new(1), Answer::Text("nope".into()))
        .await
        .unwrap();
    assert!(!outcome.is_correct);
    assert_eq!(outcome.hearts_balance, 4);
    assert_eq!(repo.debit_calls().unwrap(), 2);
}

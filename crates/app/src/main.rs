use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use learnpath_core::hearts::HeartsSnapshot;
use learnpath_core::model::{
    Answer, AttemptMode, AttemptTarget, CurriculumId, Question, QuestionId, QuestionKind, UnitId,
    UserId,
};
use learnpath_core::progression::{PathMap, UnitState};
use services::{
    Clock, ProgressionService, SessionPhase, SessionStart, TestSession, TestSessionLoop,
    TracingEventSink,
};
use storage::{InMemoryRepository, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod curriculum_file;

use curriculum_file::{CurriculumFile, DEMO_CURRICULUM, LoadedCurriculum};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidList { flag: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidList { flag, raw } => {
                write!(f, "invalid {flag} value: {raw} (expected comma-separated ids)")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn parse_ids(raw: String, flag: &'static str) -> Result<Vec<u64>, ArgsError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse::<u64>)
        .collect::<Result<_, _>>()
        .map_err(|_| ArgsError::InvalidList { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- path [--curriculum <file>] [--user <id>] [--approved <ids>]");
    eprintln!("  cargo run -p app -- play (--unit <id> | --final) [--miss <question ids>] [--practice]");
    eprintln!("                           [--curriculum <file>] [--user <id>] [--approved <ids>]");
    eprintln!("                           [--hearts <n>] [--streak <n>]");
    eprintln!();
    eprintln!("Without --curriculum a built-in demo curriculum is used.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARNPATH_CURRICULUM, LEARNPATH_USER_ID, LEARNPATH_STREAK_THRESHOLD, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Path,
    Play,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "path" => Some(Self::Path),
            "play" => Some(Self::Play),
            _ => None,
        }
    }
}

struct Args {
    curriculum: Option<PathBuf>,
    user: UserId,
    approved: Vec<UnitId>,
    hearts: Option<u32>,
    streak: Option<u32>,
    target: Option<AttemptTarget>,
    misses: HashSet<QuestionId>,
    mode: AttemptMode,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            curriculum: std::env::var("LEARNPATH_CURRICULUM").ok().map(PathBuf::from),
            user: std::env::var("LEARNPATH_USER_ID")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map_or_else(|| UserId::new(1), UserId::new),
            approved: Vec::new(),
            hearts: None,
            streak: std::env::var("LEARNPATH_STREAK_THRESHOLD")
                .ok()
                .and_then(|value| value.parse::<u32>().ok()),
            target: None,
            misses: HashSet::new(),
            mode: AttemptMode::Scored,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--curriculum" => {
                    parsed.curriculum = Some(PathBuf::from(require_value(args, "--curriculum")?));
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    parsed.user = UserId::new(parse_number(value, "--user")?);
                }
                "--approved" => {
                    let value = require_value(args, "--approved")?;
                    parsed.approved = parse_ids(value, "--approved")?
                        .into_iter()
                        .map(UnitId::new)
                        .collect();
                }
                "--hearts" => {
                    let value = require_value(args, "--hearts")?;
                    parsed.hearts = Some(parse_number(value, "--hearts")?);
                }
                "--streak" => {
                    let value = require_value(args, "--streak")?;
                    parsed.streak = Some(parse_number(value, "--streak")?);
                }
                "--unit" => {
                    let value = require_value(args, "--unit")?;
                    parsed.target = Some(AttemptTarget::Unit(UnitId::new(parse_number(
                        value, "--unit",
                    )?)));
                }
                "--final" => parsed.target = Some(AttemptTarget::FinalTest),
                "--miss" => {
                    let value = require_value(args, "--miss")?;
                    parsed.misses = parse_ids(value, "--miss")?
                        .into_iter()
                        .map(QuestionId::new)
                        .collect();
                }
                "--practice" => parsed.mode = AttemptMode::Practice,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }
}

fn load_curriculum(args: &Args) -> Result<LoadedCurriculum, Box<dyn std::error::Error>> {
    let file = match &args.curriculum {
        Some(path) => CurriculumFile::read(path)?,
        None => CurriculumFile::parse(DEMO_CURRICULUM)?,
    };
    let mut loaded = file.into_model()?;
    if let Some(streak) = args.streak {
        loaded.settings.streak_threshold = streak;
    }
    Ok(loaded)
}

/// Seeds an in-memory store with the curriculum and the learner's progress.
fn seed_storage(
    loaded: &LoadedCurriculum,
    args: &Args,
) -> Result<(Storage, InMemoryRepository), Box<dyn std::error::Error>> {
    let (storage, repo) = Storage::in_memory();
    let curriculum_id = loaded.curriculum.id();
    repo.insert_curriculum(loaded.curriculum.clone())?;
    for (target, questions) in &loaded.banks {
        repo.set_questions(curriculum_id, *target, questions.clone())?;
    }
    repo.approve(args.user, curriculum_id, args.approved.iter().copied())?;
    if let Some(balance) = args.hearts {
        repo.set_hearts(
            args.user,
            HeartsSnapshot {
                balance,
                unlimited: false,
            },
        )?;
    }
    Ok((storage, repo))
}

async fn path_map(
    storage: &Storage,
    loaded: &LoadedCurriculum,
    user: UserId,
) -> Result<PathMap, Box<dyn std::error::Error>> {
    let progression = ProgressionService::new(storage);
    let curriculum = loaded.curriculum.id();
    let map = match &loaded.edges {
        Some(edges) => progression.path_map_with_edges(user, curriculum, edges).await?,
        None => progression.path_map(user, curriculum).await?,
    };
    Ok(map)
}

fn state_label(state: UnitState) -> &'static str {
    match state {
        UnitState::Locked => "locked",
        UnitState::Available => "open",
        UnitState::Completed => "done",
    }
}

fn print_path(name: &str, map: &PathMap) {
    println!("{name}");
    for row in &map.rows {
        let cells: Vec<String> = row
            .nodes
            .iter()
            .map(|node| {
                let marker = if node.mandatory { "" } else { "*" };
                format!(
                    "[{}{marker} {} ({})]",
                    node.unit_id,
                    node.name,
                    state_label(node.state)
                )
            })
            .collect();
        println!("  row {}: {}", row.index, cells.join(" "));
    }
    match map.final_test {
        Some(state) => println!("  final test: {}", state_label(state)),
        None => println!("  final test: none"),
    }
}

/// Produces the expected answer, or a deliberately wrong one.
fn scripted_answer(question: &Question, correct: bool) -> Answer {
    match question.kind() {
        QuestionKind::MultipleChoice {
            options,
            correct_option,
        } => {
            let pick = if correct {
                *correct_option
            } else {
                (correct_option + 1) % options.len().max(1)
            };
            Answer::Choice(pick)
        }
        QuestionKind::FillInBlank { accepted } => Answer::Text(if correct {
            accepted.first().cloned().unwrap_or_default()
        } else {
            String::new()
        }),
        QuestionKind::TrueFalse { answer } => Answer::Boolean(*answer == correct),
        QuestionKind::WordOrdering { words } => {
            let mut words = words.clone();
            if !correct {
                words.reverse();
            }
            Answer::Ordering(words)
        }
    }
}

async fn play(
    loop_svc: &TestSessionLoop,
    session: &mut TestSession,
    misses: &HashSet<QuestionId>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match session.phase() {
            SessionPhase::Testing => {
                let Some(question) = session.current_question().cloned() else {
                    break;
                };
                let correct = !misses.contains(&question.id());
                let answer = scripted_answer(&question, correct);
                let outcome = loop_svc
                    .submit_answer(session, question.id(), answer)
                    .await?;
                let progress = session.progress();
                println!(
                    "  [{}/{}] Q{} {}: {} (hearts {})",
                    progress.answered,
                    progress.total,
                    question.id(),
                    question.prompt(),
                    if outcome.is_correct { "correct" } else { "wrong" },
                    outcome.hearts_balance
                );
            }
            SessionPhase::Reviewing => {
                loop_svc.advance(session).await?;
                if let Some(count) = session.streak_overlay() {
                    println!("  streak: {count} in a row");
                }
            }
            SessionPhase::MistakeReview => {
                println!(
                    "  mistake review: {} questions missed so far",
                    session.unique_wrong_count()
                );
                session.dismiss_mistake_review(Clock::default_clock().now())?;
            }
            SessionPhase::NoHeartsInterrupt if session.progress().remaining == 0 => {
                println!("  out of hearts on the last question");
                loop_svc.advance(session).await?;
            }
            SessionPhase::NoHeartsInterrupt => {
                println!("  out of hearts; attempt paused");
                session.close();
            }
            SessionPhase::SuccessCelebration => {
                println!("  perfect score!");
                session.dismiss_celebration()?;
            }
            SessionPhase::Results => {
                if let Some(result) = session.result() {
                    println!(
                        "  score {}% (needs {}%): {}, +{} xp",
                        result.score,
                        result.passing_score,
                        if result.passed { "passed" } else { "failed" },
                        result.xp_awarded
                    );
                }
                session.leave_results(Clock::default_clock().now())?;
            }
            SessionPhase::AdInterstitial => {
                println!("  (ad break)");
                session.close();
            }
            SessionPhase::Closed => break,
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // Default behavior: print the path when no subcommand is provided.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Path,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Path,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let args = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let loaded = load_curriculum(&args)?;
    let settings = loaded.settings.clone().validate()?;
    let (storage, _repo) = seed_storage(&loaded, &args)?;
    let curriculum_id: CurriculumId = loaded.curriculum.id();
    info!(curriculum = %curriculum_id, user = %args.user, ?cmd, "starting");

    match cmd {
        Command::Path => {
            let map = path_map(&storage, &loaded, args.user).await?;
            print_path(loaded.curriculum.name(), &map);
        }
        Command::Play => {
            let Some(target) = args.target else {
                eprintln!("play requires --unit <id> or --final");
                print_usage();
                return Err(ArgsError::MissingValue { flag: "--unit" }.into());
            };
            let loop_svc = TestSessionLoop::new(Clock::default_clock(), &storage)
                .with_settings(settings)
                .with_event_sink(Arc::new(TracingEventSink));

            match loop_svc
                .start(args.user, curriculum_id, target, args.mode)
                .await?
            {
                SessionStart::NoHearts(snapshot) => {
                    println!("no hearts left ({}); try again later", snapshot.balance);
                }
                SessionStart::Started(mut session) => {
                    println!("{target} ({} questions)", session.attempt().total_questions());
                    play(&loop_svc, &mut session, &args.misses).await?;
                }
            }

            let map = path_map(&storage, &loaded, args.user).await?;
            print_path(loaded.curriculum.name(), &map);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,services=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = raw.iter().map(|s| (*s).to_owned());
        Args::parse(&mut iter)
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = args(&["--user", "9", "--approved", "1, 2", "--unit", "3", "--miss", "4"])
            .unwrap();
        assert_eq!(parsed.user, UserId::new(9));
        assert_eq!(parsed.approved, vec![UnitId::new(1), UnitId::new(2)]);
        assert_eq!(parsed.target, Some(AttemptTarget::Unit(UnitId::new(3))));
        assert!(parsed.misses.contains(&QuestionId::new(4)));
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(matches!(
            args(&["--hearts", "many"]),
            Err(ArgsError::InvalidNumber { flag: "--hearts", .. })
        ));
        assert!(matches!(args(&["--user"]), Err(ArgsError::MissingValue { .. })));
        assert!(matches!(args(&["--bogus"]), Err(ArgsError::UnknownArg(_))));
    }

    #[test]
    fn scripted_answers_grade_as_intended() {
        let loaded = CurriculumFile::parse(DEMO_CURRICULUM)
            .unwrap()
            .into_model()
            .unwrap();
        for (_, questions) in &loaded.banks {
            for question in questions {
                assert!(question.grade(&scripted_answer(question, true)));
                assert!(!question.grade(&scripted_answer(question, false)));
            }
        }
    }

    #[tokio::test]
    async fn approving_first_unit_opens_the_next() {
        let loaded = CurriculumFile::parse(DEMO_CURRICULUM)
            .unwrap()
            .into_model()
            .unwrap();
        let parsed = args(&["--approved", "1"]).unwrap();
        let (storage, _repo) = seed_storage(&loaded, &parsed).unwrap();

        let map = path_map(&storage, &loaded, parsed.user).await.unwrap();
        assert_eq!(map.state_of(UnitId::new(1)), Some(UnitState::Completed));
        assert_eq!(map.state_of(UnitId::new(2)), Some(UnitState::Available));
        assert_eq!(map.state_of(UnitId::new(4)), Some(UnitState::Locked));
        assert_eq!(map.final_test, Some(UnitState::Locked));
    }
}

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;

use super::*;
use crate::error::ProviderError;
use crate::llm::{CompletionStream, Evaluator};
use crate::strategy::{EvaluatorSelection, EvaluatorTermination};

/// Yields one scripted fragment list per `complete` call.
#[derive(Default)]
struct ScriptedModel {
    scripts: Mutex<VecDeque<Vec<Result<String, ProviderError>>>>,
}

impl ScriptedModel {
    fn with_scripts(scripts: Vec<Vec<Result<String, ProviderError>>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::from(scripts)),
        })
    }

    fn repeating(fragment: &str, calls: usize) -> Arc<Self> {
        let scripts = (0..calls)
            .map(|_| vec![Ok(fragment.to_string())])
            .collect::<Vec<_>>();
        Self::with_scripts(scripts)
    }
}

impl CompletionModel for ScriptedModel {
    fn complete(&self, _instructions: &str, _history: &[ChatMessage]) -> CompletionStream {
        let mut guard = self.scripts.lock().expect("lock poisoned");
        let script = guard.pop_front().unwrap_or_else(|| {
            vec![Err(ProviderError::Response(
                "scripted model exhausted".to_string(),
            ))]
        });
        Box::pin(futures_util::stream::iter(script))
    }
}

struct ScriptedEvaluator {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
}

impl ScriptedEvaluator {
    fn with_replies(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from(replies)),
        })
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, _prompt: &str) -> Result<String, ProviderError> {
        let mut guard = self.replies.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Response(
                "no more scripted replies".to_string(),
            ))
        })
    }
}

fn writer(model: Arc<ScriptedModel>) -> Participant {
    Participant::new("Copywriter", "write one proposal per turn", model)
}

fn reviewer(model: Arc<ScriptedModel>) -> Participant {
    Participant::new("ProjectManager", "approve or refine the copy", model)
}

/// Writer/reviewer chat with round-robin selection and an evaluator-driven
/// termination listening to the reviewer.
fn review_chat(
    writer_model: Arc<ScriptedModel>,
    reviewer_model: Arc<ScriptedModel>,
    termination_replies: Vec<Result<String, ProviderError>>,
) -> GroupChat {
    GroupChat::builder()
        .participant(writer(writer_model))
        .participant(reviewer(reviewer_model))
        .termination(EvaluatorTermination::new(
            ScriptedEvaluator::with_replies(termination_replies),
            "Determine if the copy has been approved. If so, respond with a single word: yes",
            ["ProjectManager"],
        ))
        .build()
        .expect("chat builds")
}

fn speakers(events: &[ChatEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ChatEvent::MessageComplete { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn approval_stops_the_loop_before_the_cap() {
    // Reviewer speaks on iterations 2, 4, 6, 8, 10; approval on its 5th turn.
    let termination_replies = vec![
        Ok("no".to_string()),
        Ok("no".to_string()),
        Ok("no".to_string()),
        Ok("no".to_string()),
        Ok("Yes, approved.".to_string()),
    ];
    let mut chat = review_chat(
        ScriptedModel::repeating("draft", 5),
        ScriptedModel::repeating("feedback", 5),
        termination_replies,
    );

    let report = chat.invoke("advertise running shoes").await.expect("turn ok");

    assert_eq!(report.outcome, TurnOutcome::Approved);
    assert_eq!(report.iterations, 10);
    assert_eq!(report.messages.len(), 10);
}

#[tokio::test]
async fn cap_stops_the_loop_when_never_approved() {
    let termination_replies = (0..5).map(|_| Ok("no".to_string())).collect();
    let mut chat = review_chat(
        ScriptedModel::repeating("draft", 5),
        ScriptedModel::repeating("feedback", 5),
        termination_replies,
    );

    let report = chat.invoke("advertise running shoes").await.expect("turn ok");

    assert_eq!(report.outcome, TurnOutcome::IterationCap);
    assert_eq!(report.iterations, 10);
}

#[tokio::test]
async fn speakers_strictly_alternate() {
    let mut chat = review_chat(
        ScriptedModel::repeating("draft", 2),
        ScriptedModel::repeating("feedback", 2),
        vec![Ok("no".to_string()), Ok("yes".to_string())],
    );

    let events = chat
        .invoke_stream("go")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert_eq!(
        speakers(&events),
        vec!["Copywriter", "ProjectManager", "Copywriter", "ProjectManager"]
    );
}

#[tokio::test]
async fn speaker_change_marker_precedes_each_message() {
    let mut chat = review_chat(
        ScriptedModel::with_scripts(vec![vec![Ok("two ".to_string()), Ok("fragments".to_string())]]),
        ScriptedModel::repeating("fine", 1),
        vec![Ok("yes".to_string())],
    );

    let events = chat
        .invoke_stream("go")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert_eq!(
        events[0],
        ChatEvent::SpeakerChange {
            name: "Copywriter".to_string()
        }
    );
    assert_eq!(
        events[1],
        ChatEvent::Fragment {
            name: "Copywriter".to_string(),
            content: "two ".to_string()
        }
    );
    assert_eq!(
        events[3],
        ChatEvent::MessageComplete {
            name: "Copywriter".to_string(),
            content: "two fragments".to_string()
        }
    );
    assert_eq!(
        events[4],
        ChatEvent::SpeakerChange {
            name: "ProjectManager".to_string()
        }
    );
    assert!(matches!(
        events.last(),
        Some(ChatEvent::TurnComplete {
            outcome: TurnOutcome::Approved,
            ..
        })
    ));
}

#[tokio::test]
async fn termination_failure_aborts_the_turn_and_the_session_recovers() {
    // Termination listens to both participants so it is consulted every
    // iteration; it fails on the third one.
    let evaluator = ScriptedEvaluator::with_replies(vec![
        Ok("no".to_string()),
        Ok("no".to_string()),
        Err(ProviderError::Request("connection reset".to_string())),
        Ok("yes".to_string()),
    ]);
    let mut chat = GroupChat::builder()
        .participant(writer(ScriptedModel::repeating("draft", 3)))
        .participant(reviewer(ScriptedModel::repeating("feedback", 2)))
        .termination(EvaluatorTermination::new(
            evaluator,
            "approved?",
            ["Copywriter", "ProjectManager"],
        ))
        .build()
        .expect("chat builds");

    let report = chat.invoke("go").await.expect("turn ok");
    assert_eq!(report.outcome, TurnOutcome::EvaluatorFailure);
    assert_eq!(report.iterations, 3);
    assert!(chat.is_terminated());

    // Next turn starts fresh: iteration count resets and the remaining
    // scripted approval ends it immediately.
    let report = chat.invoke("again").await.expect("turn ok");
    assert_eq!(report.outcome, TurnOutcome::Approved);
    assert_eq!(report.iterations, 1);
}

#[tokio::test]
async fn stream_failure_keeps_partial_content_and_surfaces_the_error() {
    let writer_model = ScriptedModel::with_scripts(vec![
        vec![
            Ok("Buy".to_string()),
            Ok(" now".to_string()),
            Err(ProviderError::Request("connection reset".to_string())),
        ],
        vec![Ok("Fresh start".to_string())],
    ]);
    let mut chat = review_chat(
        writer_model,
        ScriptedModel::repeating("fine", 1),
        vec![Ok("yes".to_string())],
    );

    let err = chat.invoke("go").await.expect_err("must fail");
    assert!(matches!(
        err,
        ChatError::Stream { ref participant, .. } if participant == "Copywriter"
    ));

    let partial = chat.history().last().expect("partial message kept");
    assert_eq!(partial.content, "Buy now");
    assert_eq!(partial.author_name.as_deref(), Some("Copywriter"));

    // Session stays usable.
    let report = chat.invoke("again").await.expect("turn ok");
    assert_eq!(report.outcome, TurnOutcome::Approved);
}

#[tokio::test]
async fn unknown_evaluator_selection_falls_back_to_the_initial_participant() {
    // First selection (no last speaker) is the initial participant without
    // consulting the evaluator; the second reply is outside the roster.
    let selection_evaluator = ScriptedEvaluator::with_replies(vec![Ok("Intern".to_string())]);
    let mut chat = GroupChat::builder()
        .participant(writer(ScriptedModel::repeating("draft", 2)))
        .participant(reviewer(ScriptedModel::repeating("feedback", 0)))
        .selection(EvaluatorSelection::new(
            selection_evaluator,
            "pick the next speaker",
            "Copywriter",
        ))
        .max_iterations(2)
        .build()
        .expect("chat builds");

    let report = chat.invoke("go").await.expect("turn ok");

    // The preserved fallback lets the writer speak twice in a row.
    let authors = report
        .messages
        .iter()
        .filter_map(|message| message.author_name.clone())
        .collect::<Vec<_>>();
    assert_eq!(authors, vec!["Copywriter", "Copywriter"]);
    assert_eq!(report.outcome, TurnOutcome::IterationCap);
}

#[tokio::test]
async fn selection_evaluator_failure_ends_the_turn() {
    let selection_evaluator = ScriptedEvaluator::with_replies(vec![Err(
        ProviderError::Request("timeout".to_string()),
    )]);
    let mut chat = GroupChat::builder()
        .participant(writer(ScriptedModel::repeating("draft", 1)))
        .participant(reviewer(ScriptedModel::repeating("feedback", 1)))
        .selection(EvaluatorSelection::new(
            selection_evaluator,
            "pick the next speaker",
            "Copywriter",
        ))
        .build()
        .expect("chat builds");

    let report = chat.invoke("go").await.expect("turn ok");

    assert_eq!(report.outcome, TurnOutcome::EvaluatorFailure);
    assert_eq!(report.iterations, 1);
}

#[tokio::test]
async fn history_accumulates_across_turns() {
    let mut chat = review_chat(
        ScriptedModel::repeating("draft", 2),
        ScriptedModel::repeating("feedback", 2),
        vec![Ok("yes".to_string()), Ok("yes".to_string())],
    );

    chat.invoke("first").await.expect("turn ok");
    let after_first = chat.history().len();
    chat.invoke("second").await.expect("turn ok");

    // Each turn adds one user message and two participant messages.
    assert_eq!(after_first, 3);
    assert_eq!(chat.history().len(), 6);
    assert_eq!(chat.history()[0].content, "first");
    assert_eq!(chat.history()[3].content, "second");
}

#[tokio::test]
async fn blank_user_input_is_not_rejected() {
    let mut chat = review_chat(
        ScriptedModel::repeating("draft", 1),
        ScriptedModel::repeating("feedback", 1),
        vec![Ok("yes".to_string())],
    );

    // Treating blank input as end-of-session is the caller's concern.
    let report = chat.invoke("   ").await.expect("turn ok");
    assert_eq!(report.outcome, TurnOutcome::Approved);
}

#[test]
fn builder_rejects_duplicate_participants() {
    let err = GroupChat::builder()
        .participant(writer(ScriptedModel::default().into()))
        .participant(writer(ScriptedModel::default().into()))
        .build()
        .expect_err("must fail");

    assert!(matches!(err, ChatError::Config(_)));
}

#[test]
fn builder_rejects_an_initial_participant_outside_the_roster() {
    let err = GroupChat::builder()
        .participant(writer(ScriptedModel::default().into()))
        .initial_participant("Ghost")
        .build()
        .expect_err("must fail");

    assert!(matches!(err, ChatError::Config(_)));
}

#[test]
fn builder_rejects_an_empty_roster() {
    let err = GroupChat::builder().build().expect_err("must fail");
    assert!(matches!(err, ChatError::Config(_)));
}

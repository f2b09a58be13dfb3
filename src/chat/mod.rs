use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{ChatError, ProviderError, SelectionError};
use crate::history::{ChatMessage, TruncationReducer};
use crate::llm::CompletionModel;
use crate::strategy::{SelectionStrategy, SequentialSelection, TerminationStrategy};

/// A configured role in the conversation: a unique name, static
/// instructions, and a completion capability.
#[derive(Clone)]
pub struct Participant {
    name: String,
    instructions: String,
    model: Arc<dyn CompletionModel>,
}

impl Participant {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Hard cap on participant invocations per user turn.
    pub max_iterations: u32,
    /// Recent-window size for the history view handed to strategies.
    pub reducer_window: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            reducer_window: 1,
        }
    }
}

/// Events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Marker preceding the first fragment of a new speaker.
    SpeakerChange { name: String },
    /// One streamed text fragment.
    Fragment { name: String, content: String },
    /// A participant's full message, already appended to history.
    MessageComplete { name: String, content: String },
    /// The turn ended; always the final event of a surviving turn.
    TurnComplete {
        outcome: TurnOutcome,
        iterations: u32,
    },
}

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The termination strategy judged the conversation complete.
    Approved,
    /// The iteration cap was reached without approval.
    IterationCap,
    /// A strategy evaluator call failed; the turn was cut short.
    EvaluatorFailure,
}

/// Collected result of one [`GroupChat::invoke`] turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub iterations: u32,
    /// Participant messages produced during the turn, in order.
    pub messages: Vec<ChatMessage>,
}

pub struct GroupChatBuilder {
    participants: Vec<Participant>,
    selection: Option<Arc<dyn SelectionStrategy>>,
    termination: Option<Arc<dyn TerminationStrategy>>,
    initial_participant: Option<String>,
    config: ChatConfig,
}

impl Default for GroupChatBuilder {
    fn default() -> Self {
        Self {
            participants: Vec::new(),
            selection: None,
            termination: None,
            initial_participant: None,
            config: ChatConfig::default(),
        }
    }
}

impl GroupChatBuilder {
    pub fn participant(mut self, participant: Participant) -> Self {
        self.participants.push(participant);
        self
    }

    pub fn participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants.extend(participants);
        self
    }

    pub fn selection<S>(mut self, strategy: S) -> Self
    where
        S: SelectionStrategy + 'static,
    {
        self.selection = Some(Arc::new(strategy));
        self
    }

    pub fn termination<T>(mut self, strategy: T) -> Self
    where
        T: TerminationStrategy + 'static,
    {
        self.termination = Some(Arc::new(strategy));
        self
    }

    /// Participant spoken to first, and the fallback when selection fails.
    /// Defaults to the first registered participant.
    pub fn initial_participant(mut self, name: impl Into<String>) -> Self {
        self.initial_participant = Some(name.into());
        self
    }

    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn reducer_window(mut self, window: usize) -> Self {
        self.config.reducer_window = window;
        self
    }

    pub fn build(self) -> Result<GroupChat, ChatError> {
        if self.participants.is_empty() {
            return Err(ChatError::Config(
                "at least one participant must be registered".to_string(),
            ));
        }

        for (index, participant) in self.participants.iter().enumerate() {
            let duplicated = self.participants[..index]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&participant.name));
            if duplicated {
                return Err(ChatError::Config(format!(
                    "duplicate participant registered: {}",
                    participant.name
                )));
            }
        }

        let initial_name = self
            .initial_participant
            .unwrap_or_else(|| self.participants[0].name.clone());
        let Some(initial_index) = self
            .participants
            .iter()
            .position(|participant| participant.name.eq_ignore_ascii_case(&initial_name))
        else {
            return Err(ChatError::Config(format!(
                "initial participant not in roster: {initial_name}"
            )));
        };

        let roster = self
            .participants
            .iter()
            .map(|participant| participant.name.clone())
            .collect::<Vec<_>>();

        let selection = self
            .selection
            .unwrap_or_else(|| Arc::new(SequentialSelection::new(roster[initial_index].clone())));

        Ok(GroupChat {
            participants: self.participants,
            roster,
            selection,
            termination: self.termination,
            initial_index,
            reducer: TruncationReducer::new(self.config.reducer_window),
            config: self.config,
            history: Vec::new(),
            last_speaker: None,
            iteration_count: 0,
            terminated: false,
        })
    }
}

/// Orchestrates a turn-taking conversation over a shared, append-only
/// history.
///
/// Each user turn alternates participants until the termination strategy
/// approves, an evaluator fails, or the iteration cap is reached. History
/// is never cleared across turns; the session keeps full memory.
pub struct GroupChat {
    participants: Vec<Participant>,
    roster: Vec<String>,
    selection: Arc<dyn SelectionStrategy>,
    termination: Option<Arc<dyn TerminationStrategy>>,
    initial_index: usize,
    reducer: TruncationReducer,
    config: ChatConfig,
    history: Vec<ChatMessage>,
    last_speaker: Option<String>,
    iteration_count: u32,
    terminated: bool,
}

impl std::fmt::Debug for GroupChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupChat")
            .field("roster", &self.roster)
            .field("initial_index", &self.initial_index)
            .field("reducer", &self.reducer)
            .field("config", &self.config)
            .field("history", &self.history)
            .field("last_speaker", &self.last_speaker)
            .field("iteration_count", &self.iteration_count)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

impl GroupChat {
    pub fn builder() -> GroupChatBuilder {
        GroupChatBuilder::default()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn last_speaker(&self) -> Option<&str> {
        self.last_speaker.as_deref()
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Runs one turn to completion and collects the result.
    pub async fn invoke(&mut self, user_text: impl Into<String>) -> Result<TurnReport, ChatError> {
        let mark = self.history.len();

        let mut completion = None;
        {
            let stream = self.invoke_stream(user_text);
            futures_util::pin_mut!(stream);

            while let Some(event) = stream.next().await {
                if let ChatEvent::TurnComplete {
                    outcome,
                    iterations,
                } = event?
                {
                    completion = Some((outcome, iterations));
                }
            }
        }

        let (outcome, iterations) = completion.ok_or(ChatError::MissingTurnCompletion)?;

        // Skip the user message appended at the mark.
        let messages = self.history[mark..].iter().skip(1).cloned().collect();

        Ok(TurnReport {
            outcome,
            iterations,
            messages,
        })
    }

    /// Runs one user turn, streaming events as they happen.
    ///
    /// Appends the user message, then loops: select a speaker, drain its
    /// completion stream into one history message, and consult the
    /// termination strategy, until approval, failure, or the cap.
    pub fn invoke_stream(
        &mut self,
        user_text: impl Into<String>,
    ) -> impl Stream<Item = Result<ChatEvent, ChatError>> + '_ {
        let user_text = user_text.into();

        try_stream! {
            self.history.push(ChatMessage::user(user_text));
            self.iteration_count = 0;
            self.terminated = false;
            debug!(history_len = self.history.len(), "turn started");

            let outcome: Result<TurnOutcome, ChatError> = 'turn: loop {
                let reduced = self.reducer.reduce(&self.history);
                let selected = self
                    .selection
                    .next_participant(&self.roster, reduced, self.last_speaker.as_deref())
                    .await;

                let speaker = match selected {
                    Ok(name) => name,
                    Err(SelectionError::Evaluator(err)) => {
                        warn!(error = %err, "selection evaluator failed, ending turn");
                        break 'turn Ok(TurnOutcome::EvaluatorFailure);
                    }
                    Err(err) => {
                        let fallback = self.participants[self.initial_index].name.clone();
                        warn!(
                            error = %err,
                            fallback = %fallback,
                            "selection failed, falling back to initial participant"
                        );
                        fallback
                    }
                };

                let (speaker, instructions, model) = {
                    let participant = self.participant_or_initial(&speaker);
                    (
                        participant.name.clone(),
                        participant.instructions.clone(),
                        Arc::clone(&participant.model),
                    )
                };

                yield ChatEvent::SpeakerChange {
                    name: speaker.clone(),
                };

                let mut content = String::new();
                let mut stream_failure: Option<ProviderError> = None;
                {
                    let mut fragments = model.complete(&instructions, &self.history);
                    while let Some(fragment) = fragments.next().await {
                        match fragment {
                            Ok(text) => {
                                content.push_str(&text);
                                yield ChatEvent::Fragment {
                                    name: speaker.clone(),
                                    content: text,
                                };
                            }
                            Err(err) => {
                                stream_failure = Some(err);
                                break;
                            }
                        }
                    }
                }

                if let Some(source) = stream_failure {
                    // Keep whatever arrived before the failure.
                    if !content.is_empty() {
                        self.history
                            .push(ChatMessage::participant(speaker.clone(), content));
                        self.last_speaker = Some(speaker.clone());
                    }
                    break 'turn Err(ChatError::Stream {
                        participant: speaker,
                        source,
                    });
                }

                self.history
                    .push(ChatMessage::participant(speaker.clone(), content.clone()));
                self.last_speaker = Some(speaker.clone());
                self.iteration_count += 1;
                debug!(speaker = %speaker, iteration = self.iteration_count, "participant finished");

                yield ChatEvent::MessageComplete {
                    name: speaker.clone(),
                    content,
                };

                if let Some(termination) = self.termination.clone() {
                    if termination.listens_to(&speaker) {
                        let reduced = self.reducer.reduce(&self.history);
                        match termination.should_terminate(&speaker, reduced).await {
                            Ok(true) => break 'turn Ok(TurnOutcome::Approved),
                            Ok(false) => {}
                            Err(err) => {
                                warn!(error = %err, "termination evaluator failed, ending turn");
                                break 'turn Ok(TurnOutcome::EvaluatorFailure);
                            }
                        }
                    }
                }

                if self.iteration_count >= self.config.max_iterations {
                    break 'turn Ok(TurnOutcome::IterationCap);
                }
            };

            self.terminated = true;
            let outcome = outcome?;
            debug!(?outcome, iterations = self.iteration_count, "turn complete");

            yield ChatEvent::TurnComplete {
                outcome,
                iterations: self.iteration_count,
            };
        }
    }

    fn participant_or_initial(&self, name: &str) -> &Participant {
        let found = self
            .participants
            .iter()
            .find(|participant| participant.name.eq_ignore_ascii_case(name));

        match found {
            Some(participant) => participant,
            None => {
                warn!(
                    name = %name,
                    "selected participant not in roster, using initial participant"
                );
                &self.participants[self.initial_index]
            }
        }
    }
}

#[cfg(test)]
mod tests;

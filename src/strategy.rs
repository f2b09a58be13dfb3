//! Turn-taking strategies: who speaks next, and when the conversation is
//! done.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{SelectionError, TerminationError};
use crate::history::{ChatMessage, render_authors, render_transcript};
use crate::llm::Evaluator;

/// Placeholder substituted with the rendered history view in evaluator
/// prompts. Prompts without it get the history appended instead.
pub const HISTORY_PLACEHOLDER: &str = "{{$history}}";

/// Token whose case-insensitive presence in an evaluator reply means
/// "approved".
pub const APPROVAL_TOKEN: &str = "yes";

/// Picks the next speaker from a fixed roster.
///
/// Implementations must never return `last_speaker`'s name when the roster
/// has more than one member.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    async fn next_participant(
        &self,
        roster: &[String],
        history: &[ChatMessage],
        last_speaker: Option<&str>,
    ) -> Result<String, SelectionError>;
}

/// Decides whether the conversation should stop after a participant spoke.
#[async_trait]
pub trait TerminationStrategy: Send + Sync {
    /// Whether this strategy evaluates output from the given participant.
    fn listens_to(&self, participant: &str) -> bool;

    async fn should_terminate(
        &self,
        participant: &str,
        history: &[ChatMessage],
    ) -> Result<bool, TerminationError>;
}

/// Deterministic round-robin over the roster. With two participants this is
/// strict writer/reviewer alternation.
#[derive(Clone, Debug)]
pub struct SequentialSelection {
    initial: String,
}

impl SequentialSelection {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            initial: initial.into(),
        }
    }
}

#[async_trait]
impl SelectionStrategy for SequentialSelection {
    async fn next_participant(
        &self,
        roster: &[String],
        _history: &[ChatMessage],
        last_speaker: Option<&str>,
    ) -> Result<String, SelectionError> {
        let Some(last) = last_speaker else {
            return Ok(self.initial.clone());
        };

        match roster
            .iter()
            .position(|name| name.eq_ignore_ascii_case(last))
        {
            Some(index) if roster.len() > 1 => Ok(roster[(index + 1) % roster.len()].clone()),
            Some(index) => Ok(roster[index].clone()),
            None => Ok(self.initial.clone()),
        }
    }
}

/// Delegates the choice to an LLM evaluator and parses its reply as a
/// roster name.
///
/// By default only author names are rendered into the prompt; call
/// [`with_full_transcript`](Self::with_full_transcript) to include message
/// content.
pub struct EvaluatorSelection {
    evaluator: Arc<dyn Evaluator>,
    prompt: String,
    initial: String,
    name_only: bool,
}

impl EvaluatorSelection {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        prompt: impl Into<String>,
        initial: impl Into<String>,
    ) -> Self {
        Self {
            evaluator,
            prompt: prompt.into(),
            initial: initial.into(),
            name_only: true,
        }
    }

    pub fn with_full_transcript(mut self) -> Self {
        self.name_only = false;
        self
    }
}

#[async_trait]
impl SelectionStrategy for EvaluatorSelection {
    async fn next_participant(
        &self,
        roster: &[String],
        history: &[ChatMessage],
        last_speaker: Option<&str>,
    ) -> Result<String, SelectionError> {
        let Some(last) = last_speaker else {
            return Ok(self.initial.clone());
        };

        let rendered = if self.name_only {
            render_authors(history)
        } else {
            render_transcript(history)
        };
        let prompt = fill_history(&self.prompt, &rendered);

        let reply = self
            .evaluator
            .evaluate(&prompt)
            .await
            .map_err(SelectionError::Evaluator)?;
        let candidate = reply
            .trim()
            .trim_matches(|c: char| c == '.' || c == '"' || c == '\'');

        let Some(name) = roster
            .iter()
            .find(|name| name.eq_ignore_ascii_case(candidate))
        else {
            return Err(SelectionError::UnknownParticipant {
                name: candidate.to_string(),
            });
        };

        if roster.len() > 1 && name.eq_ignore_ascii_case(last) {
            return Err(SelectionError::RepeatedSpeaker { name: name.clone() });
        }

        Ok(name.clone())
    }
}

/// Terminates once a designated participant's latest output is judged as
/// approval: the evaluator reply contains [`APPROVAL_TOKEN`], any case.
pub struct EvaluatorTermination {
    evaluator: Arc<dyn Evaluator>,
    prompt: String,
    participants: Vec<String>,
}

impl EvaluatorTermination {
    pub fn new<I, S>(evaluator: Arc<dyn Evaluator>, prompt: impl Into<String>, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            evaluator,
            prompt: prompt.into(),
            participants: participants.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TerminationStrategy for EvaluatorTermination {
    fn listens_to(&self, participant: &str) -> bool {
        self.participants
            .iter()
            .any(|name| name.eq_ignore_ascii_case(participant))
    }

    async fn should_terminate(
        &self,
        participant: &str,
        history: &[ChatMessage],
    ) -> Result<bool, TerminationError> {
        if !self.listens_to(participant) {
            return Ok(false);
        }

        let prompt = fill_history(&self.prompt, &render_transcript(history));
        let reply = self.evaluator.evaluate(&prompt).await?;

        Ok(reply.to_lowercase().contains(APPROVAL_TOKEN))
    }
}

fn fill_history(prompt: &str, rendered: &str) -> String {
    if prompt.contains(HISTORY_PLACEHOLDER) {
        prompt.replace(HISTORY_PLACEHOLDER, rendered)
    } else {
        format!("{prompt}\n\nHistory:\n{rendered}")
    }
}

//! Multi-agent group chat orchestration for LLM participants.
//!
//! v0 surface:
//! - `GroupChat` per-user-turn loop over a shared, append-only history,
//!   streaming `ChatEvent`s as fragments arrive
//! - Pluggable `SelectionStrategy` (round-robin or LLM-judged) and
//!   `TerminationStrategy` (approval token, bounded by an iteration cap)
//! - `TruncationReducer` recent-window history views for strategy prompts
//! - OpenAI-compatible (streaming) and Anthropic provider adapters

pub mod chat;
pub mod error;
pub mod history;
pub mod llm;
pub mod strategy;

pub use chat::{
    ChatConfig, ChatEvent, GroupChat, GroupChatBuilder, Participant, TurnOutcome, TurnReport,
};
pub use error::{ChatError, ProviderError, SelectionError, TerminationError};
pub use history::{AuthorRole, ChatMessage, TruncationReducer};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, CompletionModel, CompletionStream, Evaluator,
    OpenAiModel, OpenAiModelConfig,
};
pub use strategy::{
    EvaluatorSelection, EvaluatorTermination, SelectionStrategy, SequentialSelection,
    TerminationStrategy,
};

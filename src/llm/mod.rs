mod anthropic;
mod openai;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ProviderError;
use crate::history::ChatMessage;

pub use anthropic::{AnthropicModel, AnthropicModelConfig};
pub use openai::{OpenAiModel, OpenAiModelConfig};

/// Lazily produced text fragments from one completion call.
///
/// `'static` so adapters assemble the request up front and the stream owns
/// everything it needs; the orchestrator is then free to touch the history
/// while draining fragments.
pub type CompletionStream = BoxStream<'static, Result<String, ProviderError>>;

/// A participant's text-completion capability.
pub trait CompletionModel: Send + Sync {
    /// Starts one completion with the participant's static instructions and
    /// the shared history as context, streaming fragments back as they
    /// arrive.
    fn complete(&self, instructions: &str, history: &[ChatMessage]) -> CompletionStream;
}

/// Single-shot text evaluation, used by selection and termination
/// strategies with different prompts and parsing rules.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, prompt: &str) -> Result<String, ProviderError>;
}

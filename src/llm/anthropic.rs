use anthropic_ai_sdk::client::AnthropicClient;
use anthropic_ai_sdk::types::message::{
    ContentBlock, CreateMessageParams, CreateMessageResponse, Message, MessageClient, MessageError,
    RequiredMessageParams, Role,
};
use async_stream::try_stream;
use async_trait::async_trait;

use crate::error::ProviderError;
use crate::history::{AuthorRole, ChatMessage};
use crate::llm::{CompletionModel, CompletionStream, Evaluator};

#[derive(Debug, Clone)]
/// Runtime configuration for [`AnthropicModel`].
pub struct AnthropicModelConfig {
    /// Anthropic API key.
    pub api_key: String,
    /// Model id (for example `claude-sonnet-4-5`).
    pub model: String,
    /// Anthropic API version header value.
    pub api_version: String,
    /// Optional base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    /// Maximum output tokens per call.
    pub max_tokens: u32,
    /// Optional sampling temperature.
    pub temperature: Option<f32>,
    /// Optional nucleus sampling parameter.
    pub top_p: Option<f32>,
}

impl AnthropicModelConfig {
    /// Creates a config with sensible defaults.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_version: AnthropicClient::DEFAULT_API_VERSION.to_string(),
            api_base_url: None,
            max_tokens: 4096,
            temperature: None,
            top_p: None,
        }
    }
}

#[derive(Debug, Clone)]
/// Anthropic adapter implementing [`CompletionModel`] and [`Evaluator`].
///
/// Delivery is buffered: each completion arrives as a single fragment once
/// the full response is available.
pub struct AnthropicModel {
    client: AnthropicClient,
    config: AnthropicModelConfig,
}

impl AnthropicModel {
    /// Creates a model adapter from explicit config.
    pub fn new(config: AnthropicModelConfig) -> Result<Self, ProviderError> {
        let mut builder =
            AnthropicClient::builder(config.api_key.clone(), config.api_version.clone());
        if let Some(url) = &config.api_base_url {
            builder = builder.with_api_base_url(url.clone());
        }

        let client = builder
            .build::<MessageError>()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Creates a model adapter using `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::Request("ANTHROPIC_API_KEY is not set".to_string()))?;
        Self::new(AnthropicModelConfig::new(api_key, model))
    }

    fn build_request(
        &self,
        instructions: Option<&str>,
        history: &[ChatMessage],
    ) -> CreateMessageParams {
        let (messages, system_lines) = to_anthropic_messages(history);

        let required = RequiredMessageParams {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
        };

        let mut request = CreateMessageParams::new(required).with_stream(false);

        let mut system = instructions
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .into_iter()
            .collect::<Vec<_>>();
        system.extend(system_lines);
        if !system.is_empty() {
            request = request.with_system(system.join("\n\n"));
        }

        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        if let Some(top_p) = self.config.top_p {
            request = request.with_top_p(top_p);
        }

        request
    }
}

impl CompletionModel for AnthropicModel {
    fn complete(&self, instructions: &str, history: &[ChatMessage]) -> CompletionStream {
        let client = self.client.clone();
        let request = self.build_request(Some(instructions), history);

        Box::pin(try_stream! {
            let response = client
                .create_message(Some(&request))
                .await
                .map_err(|err| ProviderError::Request(err.to_string()))?;

            let text = collect_text(&response);
            if !text.is_empty() {
                yield text;
            }
        })
    }
}

#[async_trait]
impl Evaluator for AnthropicModel {
    async fn evaluate(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = self.build_request(None, &[ChatMessage::user(prompt)]);

        let response = self
            .client
            .create_message(Some(&request))
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        let text = collect_text(&response);
        if text.is_empty() {
            return Err(ProviderError::Response(
                "evaluator returned no text content".to_string(),
            ));
        }

        Ok(text)
    }
}

/// Maps shared history onto the Anthropic wire shape.
///
/// System messages are lifted out into system lines. Other participants'
/// messages become assistant turns with the author kept as a content prefix,
/// since the API carries no author name. Consecutive same-role turns are
/// merged because the API expects alternating roles.
fn to_anthropic_messages(history: &[ChatMessage]) -> (Vec<Message>, Vec<String>) {
    let mut system_lines = Vec::new();
    let mut turns: Vec<(bool, String)> = Vec::new();

    for message in history {
        if message.content.is_empty() {
            continue;
        }
        let (assistant, content) = match message.role {
            AuthorRole::System => {
                system_lines.push(message.content.clone());
                continue;
            }
            AuthorRole::User => (false, message.content.clone()),
            AuthorRole::Participant => {
                let content = match &message.author_name {
                    Some(name) => format!("{name}: {}", message.content),
                    None => message.content.clone(),
                };
                (true, content)
            }
        };

        match turns.last_mut() {
            Some((last_assistant, last_content)) if *last_assistant == assistant => {
                last_content.push_str("\n\n");
                last_content.push_str(&content);
            }
            _ => turns.push((assistant, content)),
        }
    }

    let messages = turns
        .into_iter()
        .map(|(assistant, content)| {
            let role = if assistant { Role::Assistant } else { Role::User };
            Message::new_text(role, content)
        })
        .collect();

    (messages, system_lines)
}

fn collect_text(response: &CreateMessageResponse) -> String {
    let mut parts = Vec::new();

    for block in &response.content {
        if let ContentBlock::Text { text } = block {
            parts.push(text.clone());
        }
    }

    parts.join("\n")
}

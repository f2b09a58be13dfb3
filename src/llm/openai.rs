use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::history::{AuthorRole, ChatMessage};
use crate::llm::{CompletionModel, CompletionStream, Evaluator};

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const STREAM_DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct OpenAiModelConfig {
    pub api_key: String,
    pub model: String,
    /// Base URL override for Azure OpenAI, GitHub Models, or any other
    /// OpenAI-compatible endpoint.
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl OpenAiModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            top_p: None,
            max_tokens: Some(4096),
        }
    }
}

/// Adapter for OpenAI-compatible `chat/completions` endpoints, implementing
/// both [`CompletionModel`] (SSE streaming) and [`Evaluator`] (single-shot).
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: Client,
    config: OpenAiModelConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Creates a model from `OPENAI_API_KEY`, honoring an optional
    /// `OPENAI_BASE_URL` override.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Request("OPENAI_API_KEY is not set".to_string()))?;

        let mut config = OpenAiModelConfig::new(api_key, model);
        config.api_base_url = std::env::var("OPENAI_BASE_URL").ok();

        Self::new(config)
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn build_request(
        &self,
        instructions: Option<&str>,
        history: &[ChatMessage],
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: to_request_messages(instructions, history),
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            stream,
        }
    }
}

impl CompletionModel for OpenAiModel {
    fn complete(&self, instructions: &str, history: &[ChatMessage]) -> CompletionStream {
        let client = self.client.clone();
        let endpoint = self.endpoint();
        let api_key = self.config.api_key.clone();
        let request = self.build_request(Some(instructions), history, true);

        Box::pin(try_stream! {
            let response = client
                .post(endpoint)
                .header("authorization", format!("Bearer {api_key}"))
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|err| ProviderError::Request(err.to_string()))?;

            if !response.status().is_success() {
                Err::<(), ProviderError>(ProviderError::Request(
                    extract_api_error(response).await,
                ))?;
                return;
            }

            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|err| ProviderError::Request(err.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    match parse_stream_line(&line)? {
                        SseEvent::Fragment(text) => yield text,
                        SseEvent::Done => return,
                        SseEvent::Skip => {}
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Evaluator for OpenAiModel {
    async fn evaluate(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = self.build_request(None, &[ChatMessage::user(prompt)], false);

        let response = self
            .client
            .post(self.endpoint())
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Request(extract_api_error(response).await));
        }

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ProviderError::Response("completion had no text content".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum RequestMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragment(String),
    Done,
    Skip,
}

fn parse_stream_line(line: &str) -> Result<SseEvent, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };

    let data = data.trim();
    if data == STREAM_DONE_SENTINEL {
        return Ok(SseEvent::Done);
    }

    let chunk = serde_json::from_str::<StreamChunk>(data)
        .map_err(|err| ProviderError::Response(format!("bad stream chunk: {err}")))?;

    let fragment = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty());

    match fragment {
        Some(text) => Ok(SseEvent::Fragment(text)),
        None => Ok(SseEvent::Skip),
    }
}

fn to_request_messages(
    instructions: Option<&str>,
    history: &[ChatMessage],
) -> Vec<RequestMessage> {
    let mut request_messages = Vec::new();

    if let Some(instructions) = instructions {
        if !instructions.is_empty() {
            request_messages.push(RequestMessage::System {
                content: instructions.to_string(),
            });
        }
    }

    for message in history {
        if message.content.is_empty() {
            continue;
        }
        match message.role {
            AuthorRole::System => request_messages.push(RequestMessage::System {
                content: message.content.clone(),
            }),
            AuthorRole::User => request_messages.push(RequestMessage::User {
                content: message.content.clone(),
            }),
            AuthorRole::Participant => request_messages.push(RequestMessage::Assistant {
                content: message.content.clone(),
                name: message.author_name.clone(),
            }),
        }
    }

    request_messages
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<Value>,
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<ApiErrorEnvelope>(&body) {
        let code = parsed
            .error
            .code
            .map(|value| match value {
                Value::String(value) => value,
                other => other.to_string(),
            })
            .unwrap_or_else(|| status.as_u16().to_string());
        let error_type = parsed
            .error
            .type_
            .unwrap_or_else(|| status.to_string().to_uppercase());
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| "unknown api error".to_string());

        return format!("openai api error {code} {error_type}: {message}");
    }

    if body.is_empty() {
        format!("openai api request failed ({status})")
    } else {
        format!("openai api request failed ({status}): {body}")
    }
}

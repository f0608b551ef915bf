use async_trait::async_trait;
use quill_config::{AppConfig, CompletionSettings};
use quill_core::{ChatError, Completion, Message, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Returned when the endpoint succeeds without producing any text.
pub const NO_RESPONSE_PLACEHOLDER: &str = "No response received";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

/// Only role and content travel; timestamps and token estimates stay local.
#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| NO_RESPONSE_PLACEHOLDER.to_string())
    }
}

pub struct CompletionClient {
    client: reqwest::Client,
    endpoint: String,
    max_tokens: u32,
    temperature: f32,
}

impl CompletionClient {
    pub fn new(settings: &CompletionSettings) -> Self {
        info!("Completion endpoint: {}", settings.endpoint);
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.completion)
    }

    fn build_request<'a>(&self, messages: &'a [Message], model_id: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: model_id,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl Completion for CompletionClient {
    #[instrument(skip(self, messages, credential), fields(count = messages.len()))]
    async fn complete(
        &self,
        messages: &[Message],
        model_id: &str,
        credential: &str,
    ) -> Result<String> {
        if credential.is_empty() {
            return Err(ChatError::MissingCredential);
        }

        let body = self.build_request(messages, model_id);
        debug!("Requesting completion from {}", model_id);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Completion(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .and_then(|error| error.message)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| format!("API Error: {}", status.as_u16()));
            warn!("Completion failed with HTTP {}: {}", status.as_u16(), detail);
            return Err(ChatError::Completion(detail));
        }

        let reply = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ChatError::Completion(format!("Invalid completion response: {e}")))?;

        Ok(reply.into_text())
    }
}

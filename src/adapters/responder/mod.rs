use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::time::{sleep, Duration};

use crate::core::model::ChatTurn;
use crate::core::ports::responder::{DynError, ResponderPort};

pub const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

#[derive(Debug, Clone, Serialize, PartialEq)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
}

/// Non-streaming OpenAI-compatible chat-completions client.
pub struct OpenRouterResponder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    retry_delays: Vec<Duration>,
}

impl OpenRouterResponder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            system_prompt: system_prompt.into(),
            retry_delays: RETRY_DELAYS_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request_once(&self, turns: &[ChatTurn]) -> Result<String, String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "OpenRouter API key is not configured (401)".to_string())?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&ChatCompletionsRequest {
                model: self.model.clone(),
                messages: build_request_messages(&self.system_prompt, turns),
            })
            .send()
            .await
            .map_err(|e| format!("OpenRouter request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("OpenRouter API error ({status}): {body}"));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("OpenRouter returned malformed JSON: {e}"))?;
        extract_reply(&body)
    }

    async fn respond_with_retries(&self, turns: &[ChatTurn]) -> Result<String, DynError> {
        let max_attempts = self.retry_delays.len() + 1;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            match self.request_once(turns).await {
                Ok(reply) => return Ok(reply),
                Err(message) => {
                    last_error = message;
                    if !should_retry(&last_error) || attempt + 1 >= max_attempts {
                        break;
                    }
                    let delay = self.retry_delays[attempt];
                    log::warn!(
                        "assistant call failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt + 1,
                        max_attempts,
                        delay.as_millis(),
                        last_error
                    );
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.into())
    }
}

impl ResponderPort for OpenRouterResponder {
    fn respond<'a>(&'a self, turns: &'a [ChatTurn]) -> BoxFuture<'a, Result<String, DynError>> {
        Box::pin(self.respond_with_retries(turns))
    }
}

fn build_request_messages(system_prompt: &str, turns: &[ChatTurn]) -> Vec<WireMessage> {
    let system = (!system_prompt.trim().is_empty()).then(|| WireMessage {
        role: "system".to_string(),
        content: system_prompt.to_string(),
    });
    system
        .into_iter()
        .chain(turns.iter().map(|turn| WireMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }))
        .collect()
}

fn extract_reply(body: &Value) -> Result<String, String> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error");
        let code = error.get("code").map(|c| c.to_string()).unwrap_or_default();
        return Err(format!("OpenRouter error {code}: {message}"));
    }

    let content = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| "OpenRouter response has no message content".to_string())?;

    if content.trim().is_empty() {
        return Err("OpenRouter returned an empty message".to_string());
    }
    Ok(content.to_string())
}

fn is_retriable_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("429")
        || msg.contains("500")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("temporar")
        || msg.contains("rate limit")
}

fn is_auth_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("401")
        || msg.contains("403")
        || msg.contains("unauthorized")
        || msg.contains("forbidden")
        || msg.contains("invalid api key")
}

fn should_retry(message: &str) -> bool {
    !is_auth_error(message) && is_retriable_error(message)
}

//! OpenAI adapter (expense extraction).
//!
//! Uses the OpenAI `chat/completions` endpoint in JSON mode at temperature zero.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use exb_core::{
    categories::CategoryRegistry, errors::Error, expense::ExpenseCandidate, ports::ExpenseParser,
    Result,
};

#[derive(Clone)]
pub struct OpenAiClient {
    pub api_key: String,
    pub model: String,
    base_url: String,
    system_prompt: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        registry: &CategoryRegistry,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            system_prompt: build_system_prompt(registry),
            http,
        })
    }

    /// Send one completion request and return the raw assistant content.
    pub async fn complete(&self, text: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("openai request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "openai completion failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("openai json error: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                Error::MalformedModelOutput("completion contained no message content".to_string())
            })
    }
}

#[async_trait]
impl ExpenseParser for OpenAiClient {
    async fn parse(&self, text: &str) -> Result<ExpenseCandidate> {
        let content = self.complete(text).await?;
        let candidate = ExpenseCandidate::from_model_output(&content);
        if candidate.is_err() {
            tracing::debug!(
                "model output was not an expense object: {}",
                content.chars().take(200).collect::<String>()
            );
        }
        candidate
    }
}

/// Fixed instruction embedding the allowed categories.
pub fn build_system_prompt(registry: &CategoryRegistry) -> String {
    let categories = registry
        .categories()
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are an expense parser. Return ONLY valid JSON:
{{ "expense": "", "amount": number, "category": "", "person": "" }}
Allowed categories (use one exactly as written): [{categories}]
"person" is whoever paid, or "" if the message does not say."#
    )
}

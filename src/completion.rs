//! Text completion port and its OpenAI Responses API backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::CompletionError;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Always fails, so callers fall back to their deterministic paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompleter;

#[async_trait]
impl Completer for NoopCompleter {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        Err(CompletionError::Unavailable("llm engine is noop".to_owned()))
    }
}

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

/// Single-attempt client for `POST {base_url}/responses`.
#[derive(Debug, Clone)]
pub struct OpenAiCompleter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompleter {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: responses_endpoint(base_url),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn responses_text(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        let body = request_body(&self.model, request);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().await.context("read OpenAI response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("OpenAI API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse OpenAI response")?;
        extract_output_text(&value).context("extract output text")
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.responses_text(request)
            .await
            .map_err(|err| CompletionError::Failed {
                attempts: 1,
                detail: format!("{err:#}"),
            })
    }
}

fn request_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "input": request.prompt,
        "max_output_tokens": request.max_tokens,
        "text": { "format": { "type": "text" } },
        "store": false,
    });
    let Some(obj) = body.as_object_mut() else {
        return body;
    };
    if let Some(system_prompt) = &request.system_prompt {
        obj.insert("instructions".to_owned(), serde_json::json!(system_prompt));
    }
    // GPT-5 models reject sampling params like `temperature`.
    if !model.starts_with("gpt-5") {
        obj.insert(
            "temperature".to_owned(),
            serde_json::json!(request.temperature),
        );
    }
    body
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let text: String = output
        .iter()
        .filter(|item| item.get("type").and_then(|v| v.as_str()) == Some("message"))
        .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
        .flatten()
        .filter(|part| part.get("type").and_then(|v| v.as_str()) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect();

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Hard cap, including the first attempt.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based; the first attempt has none).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Retries the wrapped completer with exponential backoff.
///
/// [`CompletionError::Unavailable`] is returned immediately.
pub struct Retrying {
    inner: Arc<dyn Completer>,
    policy: RetryPolicy,
}

impl Retrying {
    pub fn new(inner: Arc<dyn Completer>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Completer for Retrying {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_detail = String::new();
        for attempt in 1..=max_attempts {
            let backoff = self.policy.backoff(attempt);
            if !backoff.is_zero() {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying completion"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.inner.complete(request).await {
                Ok(text) => return Ok(text),
                Err(err @ CompletionError::Unavailable(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(attempt, %err, "completion attempt failed");
                    last_detail = err.to_string();
                }
            }
        }
        Err(CompletionError::Failed {
            attempts: max_attempts,
            detail: last_detail,
        })
    }
}

/// Removes a surrounding Markdown code fence (with optional language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parses the outermost JSON array found in a completion response.
pub fn parse_json_array<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, CompletionError> {
    let text = strip_code_fences(text);
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(CompletionError::Malformed(
            "no JSON array in response".to_owned(),
        ));
    };
    if end < start {
        return Err(CompletionError::Malformed(
            "no JSON array in response".to_owned(),
        ));
    }
    serde_json::from_str(&text[start..=end])
        .map_err(|err| CompletionError::Malformed(format!("parse JSON array: {err}")))
}

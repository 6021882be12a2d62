//! Language model client used by the review, refactor and document stages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::errors::StageError;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// A single prompt, optionally constrained to a JSON response schema.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    pub response_schema: Option<Value>,
}

impl LlmRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response_schema: None,
        }
    }

    pub fn json(prompt: impl Into<String>, schema: Value) -> Self {
        Self {
            prompt: prompt.into(),
            response_schema: Some(schema),
        }
    }
}

/// Text generation backend.
///
/// Errors follow the stage taxonomy: unreachable service or rate limiting is
/// [`StageError::Unavailable`], a rejected request is [`StageError::Failed`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<String, StageError>;
}

/// Client for the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            temperature: 0.0,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn body(&self, request: &LlmRequest) -> Value {
        let mut generation_config = json!({ "temperature": self.temperature });
        if let Some(schema) = &request.response_schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": generation_config,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Part {
    #[serde(default)]
    text: String,
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> Result<String, StageError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| StageError::Failed("model returned no candidates".into()))?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(StageError::Failed(format!(
            "model returned an empty response (finish reason: {})",
            reason
        )));
    }
    Ok(text)
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: &LlmRequest) -> Result<String, StageError> {
        if self.api_key.trim().is_empty() {
            return Err(StageError::Unavailable(format!(
                "{} is not set",
                API_KEY_ENV
            )));
        }
        debug!(model = %self.model, chars = request.prompt.len(), "llm request");

        let resp = self
            .http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| StageError::Unavailable(format!("Gemini request failed: {}", e)))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(StageError::Unavailable(format!(
                "Gemini returned {}",
                status
            )));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(StageError::Failed(format!(
                "Gemini rejected the request ({}): {}",
                status,
                detail.trim()
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| StageError::Failed(format!("unreadable Gemini response: {}", e)))?;
        extract_text(parsed)
    }
}

/// Strip a surrounding markdown code fence, if the model added one.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (```python, ```json, ...). A one-line reply has
    // none: everything up to the closing fence is the body.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    let body = match body.rfind("```") {
        Some(idx) => &body[..idx],
        None => body,
    };
    body.trim().to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records the prompts it was given.
    #[derive(Default)]
    pub struct CannedLlm {
        replies: Mutex<VecDeque<Result<String, StageError>>>,
        pub requests: Mutex<Vec<LlmRequest>>,
    }

    impl CannedLlm {
        pub fn new(replies: Vec<Result<String, StageError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn reply(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        pub fn last_prompt(&self) -> String {
            self.requests
                .lock()
                .unwrap()
                .last()
                .map(|r| r.prompt.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn generate(&self, request: &LlmRequest) -> Result<String, StageError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(StageError::Failed("no canned reply left".into())))
        }
    }
}

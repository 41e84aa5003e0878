use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::collect::global_variables::{ANTHROPIC_VERSION, ENV_ANTHROPIC_KEY};
use crate::collect::retry::RetryPolicy;
use crate::error::NarrativeError;
use crate::report::narrative::NarrativeService;

const REQUEST_TIMEOUT_S: u64 = 120;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Narrative service backed by the Anthropic Messages API
pub struct AnthropicClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl AnthropicClient {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(AnthropicClient {
            client,
            api_url: api_url.into(),
            api_key,
            retry,
        })
    }

    /// API key from `ANTHROPIC_API_KEY`. A missing key is not an error here:
    /// every generation then fails and the report falls back.
    pub fn from_env(api_url: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var(ENV_ANTHROPIC_KEY).ok().filter(|k| !k.is_empty());
        Self::new(api_url, api_key, retry)
    }

    fn send(&self, api_key: &str, body: &MessagesRequest<'_>) -> Result<String, NarrativeError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let text = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(classify_status(code, message));
        }

        let parsed: MessagesResponse = response.json()?;
        collect_text(parsed)
    }
}

/// 529 is the API's overloaded status
fn classify_status(code: u16, message: String) -> NarrativeError {
    match code {
        429 | 500 | 502 | 503 | 504 | 529 => NarrativeError::Transient { status: code, message },
        _ => NarrativeError::Rejected { status: code, message },
    }
}

fn collect_text(response: MessagesResponse) -> Result<String, NarrativeError> {
    let text: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if text.is_empty() {
        return Err(NarrativeError::Decode("response has no text block".to_string()));
    }
    Ok(text.join("\n"))
}

impl NarrativeService for AnthropicClient {
    fn generate(&self, prompt: &str, max_tokens: u32, model: &str) -> Result<String, NarrativeError> {
        let api_key = self.api_key.as_deref().ok_or(NarrativeError::MissingApiKey)?;
        let body = MessagesRequest {
            model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };
        debug!("Requesting narrative from {} ({} prompt chars)", model, prompt.len());
        self.retry
            .run("narrative", || self.send(api_key, &body), NarrativeError::is_transient)
    }
}

//! OpenAI Chat Completions API provider.
//!
//! Implements chat completions via the `/v1/chat/completions` API. Also
//! serves Groq, OpenRouter, Ollama, and other OpenAI-compatible endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ChatMessage, CompletionRequest, Credentials, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// API style: determines minor behavior differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    Groq,
    OpenRouter,
    Ollama,
}

pub struct OpenAiProvider {
    pub base_url: String,
    pub api_style: ApiStyle,
    provider_id: String,
    timeout: Option<Duration>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    fn with_style(base_url: Option<&str>, default_url: &str, api_style: ApiStyle, id: &str) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(default_url)
                .trim_end_matches('/')
                .to_string(),
            api_style,
            provider_id: id.into(),
            timeout: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(base_url: Option<&str>) -> Self {
        Self::with_style(base_url, OPENAI_BASE_URL, ApiStyle::OpenAi, "openai")
    }

    pub fn groq(base_url: Option<&str>) -> Self {
        Self::with_style(base_url, GROQ_BASE_URL, ApiStyle::Groq, "groq")
    }

    pub fn openrouter(base_url: Option<&str>) -> Self {
        Self::with_style(base_url, OPENROUTER_BASE_URL, ApiStyle::OpenRouter, "openrouter")
    }

    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::with_style(base_url, OLLAMA_BASE_URL, ApiStyle::Ollama, "ollama")
    }

    /// Build a provider from its config id ("openai", "groq", "openrouter", "ollama").
    pub fn by_id(id: &str, base_url: Option<&str>) -> anyhow::Result<Self> {
        Ok(match id {
            "openai" => Self::openai(base_url),
            "groq" => Self::groq(base_url),
            "openrouter" => Self::openrouter(base_url),
            "ollama" => Self::ollama(base_url),
            other => anyhow::bail!("Unknown completion provider '{other}'"),
        })
    }

    /// Per-request timeout. Requests without one wait as long as the server does.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<String> {
        let api_key = match credentials {
            Credentials::ApiKey { api_key } => Some(api_key.as_str()),
            Credentials::None if self.api_style == ApiStyle::Ollama => None,
            Credentials::None => {
                anyhow::bail!("{} requires ApiKey credentials", self.provider_id)
            }
        };

        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            stream: false,
            temperature: request.temperature,
        };

        debug!(
            model = %request.model,
            base_url = %self.base_url,
            messages = request.messages.len(),
            "Calling OpenAI-compatible API"
        );

        let mut req_builder = self
            .client
            .post(self.completions_url())
            .header("content-type", "application/json")
            .json(&body);

        if let Some(api_key) = api_key {
            req_builder = req_builder.header("authorization", format!("Bearer {api_key}"));
        }
        if self.api_style == ApiStyle::OpenRouter {
            req_builder = req_builder.header("x-title", "Viva");
        }
        if let Some(timeout) = self.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error {status}: {body}", self.provider_id);
        }

        let completion: ChatCompletion = response.json().await?;
        if let Some(usage) = &completion.usage {
            debug!(
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("{} returned no choices", self.provider_id))?;
        if let Some(reason) = &choice.finish_reason {
            debug!(finish_reason = %reason, "Completion finished");
        }

        let text = choice.message.content.unwrap_or_default();
        if text.trim().is_empty() {
            anyhow::bail!("{} returned an empty completion", self.provider_id);
        }
        Ok(text.trim().to_string())
    }
}

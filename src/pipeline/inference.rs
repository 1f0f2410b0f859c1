//! Vision-model inference: one page image in, one page of markdown out.
//!
//! [`InferenceClient`] is the seam the pipeline calls through. The default
//! [`VlmClient`] sends the page to any `edgequake_llm` provider (Ollama,
//! OpenAI, Anthropic, Gemini, …) and classifies every failure so the retry
//! policy can tell a flaky connection from a request that will never work.
//!
//! A single call either succeeds or fails; retries live in
//! [`crate::pipeline::retry`].

use crate::config::BatchConfig;
use crate::error::InferenceError;
use crate::pipeline::encode::PageImage;
use crate::pipeline::postprocess::clean_page_markdown;
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Markdown extracted from one page plus the token usage reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub markdown: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Extraction {
    /// An extraction with no token accounting.
    pub fn text(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Turns one page image into markdown.
///
/// Implementations must be safe to call concurrently; the pipeline may have
/// several pages in flight when concurrency is above 1.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run a single extraction attempt.
    async fn extract(&self, image: &PageImage) -> Result<Extraction, InferenceError>;

    /// Model name recorded in checkpoints.
    fn model(&self) -> &str;
}

/// [`InferenceClient`] backed by an `edgequake_llm` provider.
pub struct VlmClient {
    provider: Arc<dyn LLMProvider>,
    model: String,
    prompt: String,
    system_prompt: Option<String>,
    options: CompletionOptions,
    timeout: Duration,
}

impl VlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &BatchConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_EXTRACTION_PROMPT.to_string()),
            system_prompt: config.system_prompt.clone(),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Message layout: optional system message, then the instruction text
    /// with the page image attached.
    fn messages(&self, image: &PageImage) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.as_str()));
        }
        messages.push(ChatMessage::user_with_images(
            self.prompt.as_str(),
            vec![image.data().clone()],
        ));
        messages
    }
}

#[async_trait]
impl InferenceClient for VlmClient {
    async fn extract(&self, image: &PageImage) -> Result<Extraction, InferenceError> {
        let messages = self.messages(image);
        let call = self.provider.chat(&messages, Some(&self.options));

        let response = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                return Err(InferenceError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => return Err(classify_provider_error(&e.to_string())),
            Ok(Ok(response)) => response,
        };

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            image.page_index(),
            response.prompt_tokens,
            response.completion_tokens
        );

        let markdown = clean_page_markdown(&response.content);
        if markdown.is_empty() {
            return Err(InferenceError::EmptyResponse);
        }

        Ok(Extraction {
            markdown,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build `CompletionOptions` from the batch config.
fn build_options(config: &BatchConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Connection-level failures: always worth another attempt.
static RE_NETWORK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"connection (?:refused|reset|closed|aborted)|dns error|error sending request|broken pipe|timed out|deadline exceeded",
    )
    .expect("valid regex")
});

/// HTTP statuses for requests that will fail the same way every time.
static RE_REJECTED_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:400|401|403|404|413|422)\b").expect("valid regex"));

/// Provider wording for auth, bad-request, unknown-model and filter failures.
static RE_REJECTED_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"unauthorized|forbidden|authentication|api key|invalid[ _]request|content[ _]filter|does not support images|\bmodel\b.*\bnot found\b",
    )
    .expect("valid regex")
});

/// Sort a provider error into transient or permanent.
///
/// Providers surface HTTP failures as text, so this goes by the message.
/// Network failures win over everything else, since a URL or port in the
/// message may look like a status code. Auth, bad-request, unknown-model
/// and content-filter failures are permanent; anything else (5xx, 429,
/// unknown errors) is worth another attempt.
pub fn classify_provider_error(message: &str) -> InferenceError {
    let lower = message.to_ascii_lowercase();
    if RE_NETWORK.is_match(&lower) {
        return InferenceError::Transport(message.to_string());
    }
    if RE_REJECTED_STATUS.is_match(&lower) || RE_REJECTED_TEXT.is_match(&lower) {
        InferenceError::Rejected(message.to_string())
    } else {
        InferenceError::Transport(message.to_string())
    }
}

//! Answer synthesis from retrieved passages.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::models::LlmConfig;
use crate::utils::retry::{RetryConfig, RetryResult, with_retry};

const SYSTEM_PROMPT: &str = "You answer questions about a single document. \
Use only the numbered context passages provided. \
If the passages do not contain the answer, say that you don't know.";

/// Produces an answer from a question and passages in retrieval order.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    /// `passages` arrive most relevant first and must be used in that order.
    async fn synthesize(&self, question: &str, passages: &[String]) -> Result<String, SynthesisError>;

    fn name(&self) -> &str;
}

/// User message with numbered passages, in the order given.
pub fn build_prompt(question: &str, passages: &[String]) -> String {
    let mut prompt = String::from("Context:\n");
    for (i, passage) in passages.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {}", i + 1, passage.trim());
    }
    let _ = write!(prompt, "\nQuestion: {}\nAnswer:", question.trim());
    prompt
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Chat completions against the OpenAI (or a compatible) API.
#[derive(Debug, Clone)]
pub struct OpenAiSynthesizer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryConfig,
}

impl OpenAiSynthesizer {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self, SynthesisError> {
        if api_key.trim().is_empty() {
            return Err(SynthesisError::Unauthorized(
                "API key must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn complete(&self, prompt: &str) -> Result<String, SynthesisError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Timeout
                } else {
                    SynthesisError::RequestError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    SynthesisError::Unauthorized(detail)
                }
                _ => SynthesisError::ServerError(format!("status {}: {}", status, detail)),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| SynthesisError::InvalidResponse("no completion returned".to_string()))
    }
}

#[async_trait]
impl AnswerSynthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, question: &str, passages: &[String]) -> Result<String, SynthesisError> {
        let prompt = build_prompt(question, passages);
        debug!(model = %self.model, passages = passages.len(), "requesting completion");

        match with_retry(&self.retry, || self.complete(&prompt)).await {
            RetryResult::Success(answer) => Ok(answer),
            RetryResult::Failed {
                last_error,
                attempts,
            } => {
                warn!(attempts, error = %last_error, "completion request failed");
                Err(last_error)
            }
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Stands in for a chat model when only retrieval is wanted, so no completion credentials
/// are needed. Every synthesis request fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalOnly;

#[async_trait]
impl AnswerSynthesizer for RetrievalOnly {
    async fn synthesize(&self, _question: &str, _passages: &[String]) -> Result<String, SynthesisError> {
        Err(SynthesisError::InvalidResponse(
            "answer generation is disabled for this session".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "retrieval-only"
    }
}

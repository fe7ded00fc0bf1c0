//! Gemini REST adapter for embeddings and article generation.

use super::{HttpClientError, insert_header, join_url};
use crate::scheduler::ports::{ContentGenerator, GenerationError, GenerationResult};
use async_trait::async_trait;
use minijinja::{Environment, context};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Public Gemini API root.
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROMPT_TEMPLATE: &str = "\
Write a technical blog post in Markdown about the following topic.

Topic: {{ topic }}
{% if references %}
Reference material from earlier articles, most relevant first:
{% for reference in references %}
---
{{ reference }}
{% endfor %}
---
{% endif %}
Keep the post self-contained and do not repeat the reference material verbatim.
";

/// Connection settings for [`GeminiContentGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    /// API key sent with every request.
    pub api_key: String,
    /// API root.
    pub api_url: String,
    /// Model used for article generation.
    pub model: String,
    /// Model used for embeddings.
    pub embedding_model: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Creates a configuration with the default models.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_GEMINI_API_URL.to_owned(),
            model: "gemini-pro".to_owned(),
            embedding_model: "embedding-001".to_owned(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the API root.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Non-success HTTP answer from the API.
#[derive(Debug, Error)]
#[error("Gemini answered {status}: {body}")]
pub struct GeminiStatusError {
    /// Response status.
    pub status: StatusCode,
    /// Response body, as returned.
    pub body: String,
}

/// Content generator backed by the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiContentGenerator {
    client: Client,
    config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Renders the generation prompt for `topic`.
///
/// # Errors
///
/// Returns [`GenerationError::Backend`] when the template fails to render.
pub fn render_prompt(topic: &str, references: &[String]) -> GenerationResult<String> {
    Environment::new()
        .render_str(PROMPT_TEMPLATE, context! { topic, references })
        .map_err(GenerationError::backend)
}

fn classify(error: GeminiStatusError) -> GenerationError {
    let status = error.status;
    let retryable = status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS;
    if status.is_client_error() && !retryable {
        GenerationError::Rejected(error.to_string())
    } else {
        GenerationError::backend(error)
    }
}

fn extract_embedding(response: EmbedResponse) -> GenerationResult<Vec<f32>> {
    match response.embedding {
        Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
        _ => Err(GenerationError::EmptyResponse),
    }
}

fn extract_text(response: GenerateResponse) -> GenerationResult<String> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(GenerationError::Rejected(format!("prompt blocked: {reason}")));
    }
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text)
}

impl GeminiContentGenerator {
    /// Builds the adapter and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] when the API key is not a valid header
    /// value or the client cannot be built.
    pub fn new(config: GeminiConfig) -> Result<Self, HttpClientError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "x-goog-api-key", &config.api_key, true)?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        join_url(&self.config.api_url, &format!("models/{model}:{method}"))
    }

    async fn post<B: Serialize + Sync>(&self, url: String, body: &B) -> GenerationResult<Response> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(GenerationError::backend)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();
        Err(classify(GeminiStatusError {
            status,
            body: body_text,
        }))
    }
}

#[async_trait]
impl ContentGenerator for GeminiContentGenerator {
    async fn embed(&self, text: &str) -> GenerationResult<Vec<f32>> {
        let model = &self.config.embedding_model;
        let request = EmbedRequest {
            model: format!("models/{model}"),
            content: Content {
                role: None,
                parts: vec![Part { text }],
            },
        };
        let response = self
            .post(self.model_url(model, "embedContent"), &request)
            .await?
            .json::<EmbedResponse>()
            .await
            .map_err(GenerationError::backend)?;
        extract_embedding(response)
    }

    async fn generate(&self, topic: &str, references: &[String]) -> GenerationResult<String> {
        let prompt = render_prompt(topic, references)?;
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt }],
            }],
        };
        let response = self
            .post(
                self.model_url(&self.config.model, "generateContent"),
                &request,
            )
            .await?
            .json::<GenerateResponse>()
            .await
            .map_err(GenerationError::backend)?;
        extract_text(response)
    }
}

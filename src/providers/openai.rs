//! OpenAI-compatible API clients
//!
//! Implements the `Embedder` and `CompletionProvider` traits against the
//! `/embeddings` and `/chat/completions` endpoints. Streaming completions use
//! server-sent events with `stream_options.include_usage` so usage counters
//! arrive on the final chunk.

use super::{CompletionDelta, CompletionProvider, Embedder, TokenCounts};
use crate::config::OpenAiConfig;
use crate::errors::AppError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedding client for an OpenAI-compatible `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self { client, config }
    }

    async fn request(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, TokenCounts), AppError> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let payload = EmbeddingRequest {
            input: texts,
            model: &self.config.embedding_model,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingFailed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingFailed(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::EmbeddingFailed(format!("invalid response: {}", e)))?;

        let usage = TokenCounts {
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: 0,
            total_tokens: parsed.usage.total_tokens,
        };

        // Response order is not guaranteed to match input order; sort by index
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        let vectors = data.into_iter().map(|d| d.embedding).collect();

        Ok((vectors, usage))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_one(&self, text: &str) -> Result<(Vec<f32>, TokenCounts), AppError> {
        let input = [text.to_string()];
        let (mut vectors, usage) = self.request(&input).await?;
        if vectors.is_empty() {
            return Err(AppError::EmbeddingFailed("empty response".to_string()));
        }
        Ok((vectors.swap_remove(0), usage))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, TokenCounts), AppError> {
        let (vectors, usage) = self.request(texts).await?;
        if vectors.len() != texts.len() {
            return Err(AppError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok((vectors, usage))
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }
}

/// Chat client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig) -> Self {
        // No client-level timeout: streamed responses can legitimately outlive
        // a single-request deadline. The engine bounds each fragment instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self { client, config }
    }

    fn request_body(&self, prompt: &str, stream: bool) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.config.chat_model,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, AppError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderUnavailable(format!(
                "API error {}: {}",
                status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<(String, TokenCounts), AppError> {
        let response = self.send(prompt, false).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("invalid response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .ok_or_else(|| AppError::ProviderUnavailable("response missing content".to_string()))?;

        let usage = parsed.usage.map(TokenCounts::from).unwrap_or_default();
        Ok((text, usage))
    }

    async fn complete_stream(
        &self,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<CompletionDelta, AppError>>, AppError> {
        let response = self.send(prompt, true).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream(move |yielder| async move {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk_result) = bytes.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = yielder
                            .send(Err(AppError::ProviderUnavailable(format!(
                                "stream read error: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..pos + 1).collect();
                    let line = String::from_utf8_lossy(&line_bytes).trim().to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let data = line.strip_prefix("data:").unwrap_or(&line).trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }

                    let parsed: ChatStreamChunk = match serde_json::from_str(data) {
                        Ok(p) => p,
                        Err(e) => {
                            let _ = yielder
                                .send(Err(AppError::ProviderUnavailable(format!(
                                    "invalid stream payload: {}",
                                    e
                                ))))
                                .await;
                            return;
                        }
                    };

                    let mut delta = CompletionDelta::default();
                    if let Some(choice) = parsed.choices.into_iter().next() {
                        if let Some(d) = choice.delta {
                            delta.text = d.content.filter(|t| !t.is_empty());
                        }
                    }
                    if let Some(usage) = parsed.usage {
                        delta.usage = Some(TokenCounts::from(usage));
                    }

                    if delta.text.is_some() || delta.usage.is_some() {
                        // Receiver dropped means the consumer went away; stop
                        if yielder.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(stream)
    }

    fn model_name(&self) -> &str {
        &self.config.chat_model
    }
}

/// Bridge an async producer into a boxed stream via a bounded channel
fn async_stream<F, Fut>(producer: F) -> BoxStream<'static, Result<CompletionDelta, AppError>>
where
    F: FnOnce(tokio::sync::mpsc::Sender<Result<CompletionDelta, AppError>>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    tokio::spawn(producer(tx));
    tokio_stream_wrapper(rx)
}

fn tokio_stream_wrapper(
    rx: tokio::sync::mpsc::Receiver<Result<CompletionDelta, AppError>>,
) -> BoxStream<'static, Result<CompletionDelta, AppError>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

// Wire types

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: Option<ChatStreamDelta>,
}

#[derive(Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<ApiUsage> for TokenCounts {
    fn from(u: ApiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

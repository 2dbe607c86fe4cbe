//! Remote model provider abstractions
//!
//! The engine only depends on these traits; `openai.rs` implements them
//! against any OpenAI-compatible API and `mock.rs` provides offline stand-ins.

pub mod mock;
pub mod openai;

pub use mock::{MockCompletion, MockEmbedder};
pub use openai::{OpenAiChat, OpenAiEmbedder};

use crate::errors::AppError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Token counts reported by a provider for one API call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One element of a streaming completion: an incremental text fragment, a
/// usage update, or both. Usage may be attached to any fragment including the
/// final one, and is not guaranteed to arrive exactly once.
#[derive(Debug, Clone, Default)]
pub struct CompletionDelta {
    pub text: Option<String>,
    pub usage: Option<TokenCounts>,
}

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single query text
    async fn embed_one(&self, text: &str) -> Result<(Vec<f32>, TokenCounts), AppError>;

    /// Embed one batch of texts in a single API request
    async fn embed_batch(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, TokenCounts), AppError>;

    fn model_name(&self) -> &str;
}

/// Trait for chat completion generation
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// One-shot completion
    async fn complete(&self, prompt: &str) -> Result<(String, TokenCounts), AppError>;

    /// Streaming completion as a lazy sequence of deltas
    async fn complete_stream(
        &self,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<CompletionDelta, AppError>>, AppError>;

    fn model_name(&self) -> &str;
}

//! Offline mock providers
//!
//! Selected when the configured API key is "mock". Embeddings are
//! deterministic hashes of the input text so similar texts map to identical
//! vectors and retrieval stays reproducible without network access.

use super::{CompletionDelta, CompletionProvider, Embedder, TokenCounts};
use crate::errors::AppError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // FNV-style rolling hash seeds a reproducible pseudo-vector
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for b in text.as_bytes() {
            state ^= u64::from(*b);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (0..self.dim)
            .map(|i| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(i as u64);
                ((state >> 33) as f32 / u32::MAX as f32) - 0.5
            })
            .collect()
    }

    fn usage_for(texts: &[String]) -> TokenCounts {
        let tokens: u64 = texts
            .iter()
            .map(|t| t.split_whitespace().count() as u64)
            .sum();
        TokenCounts {
            prompt_tokens: tokens,
            completion_tokens: 0,
            total_tokens: tokens,
        }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_one(&self, text: &str) -> Result<(Vec<f32>, TokenCounts), AppError> {
        let tokens = text.split_whitespace().count() as u64;
        let usage = TokenCounts {
            prompt_tokens: tokens,
            completion_tokens: 0,
            total_tokens: tokens,
        };
        Ok((self.vector_for(text), usage))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, TokenCounts), AppError> {
        let vectors = texts.iter().map(|t| self.vector_for(t)).collect();
        Ok((vectors, Self::usage_for(texts)))
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

pub struct MockCompletion;

const MOCK_ANSWER: &str =
    "This is a mock answer generated without contacting a completion provider.";

#[async_trait]
impl CompletionProvider for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<(String, TokenCounts), AppError> {
        let prompt_tokens = prompt.split_whitespace().count() as u64;
        let completion_tokens = MOCK_ANSWER.split_whitespace().count() as u64;
        Ok((
            MOCK_ANSWER.to_string(),
            TokenCounts {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        ))
    }

    async fn complete_stream(
        &self,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<CompletionDelta, AppError>>, AppError> {
        let prompt_tokens = prompt.split_whitespace().count() as u64;
        let words: Vec<String> = MOCK_ANSWER
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let completion_tokens = words.len() as u64;

        let mut deltas: Vec<Result<CompletionDelta, AppError>> = words
            .into_iter()
            .map(|w| {
                Ok(CompletionDelta {
                    text: Some(w),
                    usage: None,
                })
            })
            .collect();
        deltas.push(Ok(CompletionDelta {
            text: None,
            usage: Some(TokenCounts {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        }));

        Ok(futures::stream::iter(deltas).boxed())
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embeddings_are_deterministic() {
        let embedder = MockEmbedder::new(16);
        let (a, _) = embedder.embed_one("same text").await.unwrap();
        let (b, _) = embedder.embed_one("same text").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let (c, _) = embedder.embed_one("different text").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_mock_batch_matches_single() {
        let embedder = MockEmbedder::new(8);
        let texts = vec!["one".to_string(), "two".to_string()];
        let (vectors, usage) = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        let (single, _) = embedder.embed_one("one").await.unwrap();
        assert_eq!(vectors[0], single);
        assert!(usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_mock_stream_reassembles_to_full_answer() {
        let mut stream = MockCompletion.complete_stream("question").await.unwrap();
        let mut text = String::new();
        let mut usage_seen = false;
        while let Some(delta) = stream.next().await {
            let delta = delta.unwrap();
            if let Some(t) = delta.text {
                text.push_str(&t);
            }
            if delta.usage.is_some() {
                usage_seen = true;
            }
        }
        let (full, _) = MockCompletion.complete("question").await.unwrap();
        assert_eq!(text, full);
        assert!(usage_seen);
    }
}

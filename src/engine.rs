//! Context engine
//!
//! Orchestrates extraction, chunking, index build, prompt assembly and the
//! completion call. Owns the ingestion/readiness state machine and the
//! streaming answer pipeline.

use crate::chunker::{self, ChunkerConfig};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::extract::DocumentExtractor;
use crate::index::DocumentIndex;
use crate::prompt::{ConversationTurn, PromptBuilder};
use crate::providers::{CompletionProvider, Embedder};
use crate::usage::{CallKind, UsageTracker};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

/// Lifecycle of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Ingesting,
    Ready,
    Failed,
}

/// Wire event emitted by a streaming answer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Always first on a successful stream start
    Metadata { chunks_used: usize },
    /// Incremental answer fragment, in delivery order
    Content { text: String },
    /// Terminal: full accumulated answer
    Done { text: String },
    /// Terminal: failure cause
    Error { message: String },
}

/// Result of a non-streaming answer; query-time failures are carried in the
/// body rather than surfaced as errors.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub answer: String,
    pub context_pages: Vec<usize>,
    pub chunks_used: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const NOT_READY_MESSAGE: &str =
    "I'm sorry, but the context system is not ready yet. Please try again in a moment.";
const PROVIDER_FAILURE_MESSAGE: &str =
    "I encountered an error while processing your question. Please try again.";

struct EngineInner {
    state: EngineState,
    index: Option<Arc<DocumentIndex>>,
}

/// One engine instance serves one document and one active conversation.
pub struct ContextEngine {
    extractor: Arc<dyn DocumentExtractor>,
    embedder: Arc<dyn Embedder>,
    completions: Arc<dyn CompletionProvider>,
    usage: Arc<UsageTracker>,
    prompt_builder: PromptBuilder,
    config: AppConfig,
    inner: RwLock<EngineInner>,
    /// Serializes ingestions; queries never take this
    ingest_lock: tokio::sync::Mutex<()>,
}

impl ContextEngine {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        embedder: Arc<dyn Embedder>,
        completions: Arc<dyn CompletionProvider>,
        usage: Arc<UsageTracker>,
        config: AppConfig,
    ) -> Self {
        let prompt_builder = PromptBuilder::new(config.retrieval.history_window);
        Self {
            extractor,
            embedder,
            completions,
            usage,
            prompt_builder,
            config,
            inner: RwLock::new(EngineInner {
                state: EngineState::Uninitialized,
                index: None,
            }),
            ingest_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> EngineState {
        self.read_inner().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    pub fn chunk_count(&self) -> usize {
        self.read_inner()
            .index
            .as_ref()
            .map(|i| i.chunk_count())
            .unwrap_or(0)
    }

    pub fn chat_model(&self) -> &str {
        self.completions.model_name()
    }

    pub fn page_count(&self) -> usize {
        self.read_inner()
            .index
            .as_ref()
            .map(|i| i.page_count())
            .unwrap_or(0)
    }

    /// Ingest a document, replacing any previously loaded one.
    ///
    /// Destructive full-replace: the new index is swapped in atomically once
    /// complete, so queries holding a snapshot of the old index finish
    /// consistently while new queries see `Ingesting` until the swap.
    pub async fn initialize(&self, bytes: Vec<u8>) -> Result<usize, AppError> {
        let _guard = self.ingest_lock.lock().await;
        let start = Instant::now();
        self.set_state(EngineState::Ingesting, true);

        let extractor = self.extractor.clone();
        let pages = match tokio::task::spawn_blocking(move || extractor.extract(&bytes)).await {
            Ok(Ok(pages)) => pages,
            Ok(Err(e)) => {
                self.set_state(EngineState::Failed, false);
                return Err(e);
            }
            Err(e) => {
                self.set_state(EngineState::Failed, false);
                return Err(AppError::ExtractionFailed(format!(
                    "extraction task failed: {}",
                    e
                )));
            }
        };

        let chunker_config = ChunkerConfig {
            max_chunk_chars: self.config.document.chunk_size,
        };
        let chunks = chunker::split_document(&pages, &chunker_config);
        if chunks.is_empty() {
            self.set_state(EngineState::Failed, false);
            return Err(AppError::ExtractionFailed(
                "document produced no usable chunks".to_string(),
            ));
        }

        let total_words: usize = chunks.iter().map(|c| c.word_count).sum();
        let total_chars: usize = chunks.iter().map(|c| c.content.chars().count()).sum();
        let chunk_count = chunks.len();

        let index = DocumentIndex::build(
            chunks,
            self.embedder.as_ref(),
            self.config.retrieval.embedding_batch_size,
            &self.usage,
        )
        .await;

        if index.failed_embedding_count() > 0 {
            warn!(
                failed = index.failed_embedding_count(),
                total = chunk_count,
                "Some chunks have no embedding and will never be retrieved"
            );
        }

        let pages_indexed = index.page_count();
        {
            let mut inner = self.write_inner();
            inner.index = Some(Arc::new(index));
            inner.state = EngineState::Ready;
        }

        metrics::counter!("docuchat_ingest_documents_total").increment(1);
        metrics::counter!("docuchat_ingest_chunks_total").increment(chunk_count as u64);
        metrics::histogram!("docuchat_ingest_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        info!(
            pages = pages_indexed,
            chunks = chunk_count,
            total_words,
            total_chars,
            avg_words_per_chunk = total_words / chunk_count,
            total_ms = start.elapsed().as_millis(),
            "Document ingested"
        );

        Ok(chunk_count)
    }

    /// Answer a query in one shot.
    ///
    /// Never returns an error: not-ready and provider failures become
    /// user-facing `success: false` outcomes with distinguishable messages.
    pub async fn answer(&self, query: &str, history: &[ConversationTurn]) -> ChatOutcome {
        let Some(index) = self.ready_index() else {
            return ChatOutcome {
                answer: NOT_READY_MESSAGE.to_string(),
                context_pages: Vec::new(),
                chunks_used: 0,
                success: false,
                error: Some(AppError::NotReady.to_string()),
            };
        };

        metrics::counter!("docuchat_chat_requests_total").increment(1);

        let query_vector = self.embed_query(query).await;
        let retrieved = match &query_vector {
            Some(v) => index.search(
                v,
                self.config.retrieval.top_k,
                self.config.retrieval.similarity_threshold,
            ),
            None => Vec::new(),
        };
        let context_pages: Vec<usize> = retrieved.iter().map(|r| r.chunk.page_number).collect();
        let chunks_used = retrieved.len();
        let prompt = self.prompt_builder.build(query, &retrieved, history);
        drop(retrieved);

        match self.complete_with_timeout(&prompt).await {
            Ok((answer, counts)) => {
                self.usage
                    .record(CallKind::Chat, self.completions.model_name(), counts);
                ChatOutcome {
                    answer,
                    context_pages,
                    chunks_used,
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Completion call failed");
                ChatOutcome {
                    answer: PROVIDER_FAILURE_MESSAGE.to_string(),
                    context_pages: Vec::new(),
                    chunks_used: 0,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Answer a query as a lazy event sequence.
    ///
    /// Emits exactly one `metadata` event first, zero or more `content`
    /// fragments in delivery order, then exactly one terminal `done` or
    /// `error` event. A not-ready engine yields a single `error` event. The
    /// producer stops issuing provider work when the consumer goes away.
    pub fn answer_stream(
        self: Arc<Self>,
        query: String,
        history: Vec<ConversationTurn>,
    ) -> impl futures::Stream<Item = StreamEvent> {
        let (tx, rx) = mpsc::channel::<StreamEvent>(32);

        tokio::spawn(async move {
            self.run_stream(query, history, tx).await;
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    async fn run_stream(
        &self,
        query: String,
        history: Vec<ConversationTurn>,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        use futures::StreamExt;

        let Some(index) = self.ready_index() else {
            let _ = tx
                .send(StreamEvent::Error {
                    message: NOT_READY_MESSAGE.to_string(),
                })
                .await;
            return;
        };

        metrics::counter!("docuchat_stream_requests_total").increment(1);

        let query_vector = self.embed_query(&query).await;
        let retrieved = match &query_vector {
            Some(v) => index.search(
                v,
                self.config.retrieval.top_k,
                self.config.retrieval.similarity_threshold,
            ),
            None => Vec::new(),
        };
        let chunks_used = retrieved.len();
        let prompt = self.prompt_builder.build(&query, &retrieved, &history);
        drop(retrieved);

        // Metadata goes out before any content
        if tx
            .send(StreamEvent::Metadata { chunks_used })
            .await
            .is_err()
        {
            return;
        }

        let provider_timeout = self.config.provider_timeout();
        let mut stream = match timeout(provider_timeout, self.completions.complete_stream(&prompt))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to start completion stream");
                let _ = tx
                    .send(StreamEvent::Error {
                        message: PROVIDER_FAILURE_MESSAGE.to_string(),
                    })
                    .await;
                return;
            }
            Err(_) => {
                let e = AppError::ProviderTimeout {
                    service: "chat".into(),
                    timeout_secs: provider_timeout.as_secs(),
                };
                warn!(error = %e, "Completion stream start timed out");
                let _ = tx
                    .send(StreamEvent::Error {
                        message: PROVIDER_FAILURE_MESSAGE.to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut accumulated = String::new();
        loop {
            // Bound the wait for every fragment, not just the first
            let next = match timeout(provider_timeout, stream.next()).await {
                Ok(item) => item,
                Err(_) => {
                    warn!(
                        timeout_secs = provider_timeout.as_secs(),
                        "Completion stream stalled"
                    );
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: PROVIDER_FAILURE_MESSAGE.to_string(),
                        })
                        .await;
                    return;
                }
            };

            match next {
                Some(Ok(delta)) => {
                    // Fold usage in as it arrives; it can ride on any fragment
                    if let Some(counts) = delta.usage {
                        self.usage
                            .record(CallKind::Chat, self.completions.model_name(), counts);
                    }
                    if let Some(text) = delta.text {
                        accumulated.push_str(&text);
                        if tx.send(StreamEvent::Content { text }).await.is_err() {
                            // Consumer disconnected; stop pulling the provider
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Completion stream failed mid-answer");
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: PROVIDER_FAILURE_MESSAGE.to_string(),
                        })
                        .await;
                    return;
                }
                None => break,
            }
        }

        let _ = tx.send(StreamEvent::Done { text: accumulated }).await;
    }

    /// Embed the query text; a failure degrades to "no context found"
    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let provider_timeout = self.config.provider_timeout();
        match timeout(provider_timeout, self.embedder.embed_one(query)).await {
            Ok(Ok((vector, counts))) => {
                self.usage
                    .record(CallKind::Embedding, self.embedder.model_name(), counts);
                Some(vector)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Query embedding failed, answering without context");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = provider_timeout.as_secs(),
                    "Query embedding timed out, answering without context"
                );
                None
            }
        }
    }

    async fn complete_with_timeout(
        &self,
        prompt: &str,
    ) -> Result<(String, crate::providers::TokenCounts), AppError> {
        let provider_timeout = self.config.provider_timeout();
        timeout(provider_timeout, self.completions.complete(prompt))
            .await
            .map_err(|_| AppError::ProviderTimeout {
                service: "chat".into(),
                timeout_secs: provider_timeout.as_secs(),
            })?
    }

    /// Snapshot of the index, only when the engine is `Ready`
    fn ready_index(&self) -> Option<Arc<DocumentIndex>> {
        let inner = self.read_inner();
        if inner.state == EngineState::Ready {
            inner.index.clone()
        } else {
            None
        }
    }

    fn set_state(&self, state: EngineState, clear_index: bool) {
        let mut inner = self.write_inner();
        inner.state = state;
        if clear_index {
            inner.index = None;
        }
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, EngineInner> {
        self.inner.read().expect("engine lock poisoned")
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, EngineInner> {
        self.inner.write().expect("engine lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PageText;
    use crate::providers::{CompletionDelta, TokenCounts};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use futures::{StreamExt, stream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> AppConfig {
        // Defaults mirror config.rs; only what tests rely on matters here
        crate::config::AppConfig::build().expect("default config")
    }

    struct TextExtractor;

    impl DocumentExtractor for TextExtractor {
        fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, AppError> {
            let text = String::from_utf8_lossy(bytes).to_string();
            if text.trim().is_empty() {
                return Err(AppError::ExtractionFailed("empty document".into()));
            }
            Ok(vec![PageText {
                page_number: 1,
                text,
            }])
        }
    }

    /// Embedder with counted calls; first vector component encodes identity
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_one(&self, _text: &str) -> Result<(Vec<f32>, TokenCounts), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((
                vec![1.0, 0.0],
                TokenCounts {
                    prompt_tokens: 3,
                    completion_tokens: 0,
                    total_tokens: 3,
                },
            ))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> Result<(Vec<Vec<f32>>, TokenCounts), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((
                texts.iter().map(|_| vec![1.0, 0.0]).collect(),
                TokenCounts {
                    prompt_tokens: texts.len() as u64,
                    completion_tokens: 0,
                    total_tokens: texts.len() as u64,
                },
            ))
        }

        fn model_name(&self) -> &str {
            "counting-embedder"
        }
    }

    /// Completion provider that replays a scripted stream
    struct ScriptedCompletion {
        calls: AtomicUsize,
        script: Vec<Result<CompletionDelta, AppError>>,
    }

    impl ScriptedCompletion {
        fn new(script: Vec<Result<CompletionDelta, AppError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
            }
        }

        fn text(t: &str) -> Result<CompletionDelta, AppError> {
            Ok(CompletionDelta {
                text: Some(t.to_string()),
                usage: None,
            })
        }

        fn usage(prompt: u64, completion: u64) -> Result<CompletionDelta, AppError> {
            Ok(CompletionDelta {
                text: None,
                usage: Some(TokenCounts {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                }),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletion {
        async fn complete(&self, _prompt: &str) -> Result<(String, TokenCounts), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut text = String::new();
            let mut counts = TokenCounts::default();
            for item in &self.script {
                match item {
                    Ok(delta) => {
                        if let Some(t) = &delta.text {
                            text.push_str(t);
                        }
                        if let Some(u) = delta.usage {
                            counts = u;
                        }
                    }
                    Err(_) => {
                        return Err(AppError::ProviderUnavailable("scripted failure".into()))
                    }
                }
            }
            Ok((text, counts))
        }

        async fn complete_stream(
            &self,
            _prompt: &str,
        ) -> Result<BoxStream<'static, Result<CompletionDelta, AppError>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items: Vec<Result<CompletionDelta, AppError>> = self
                .script
                .iter()
                .map(|item| match item {
                    Ok(delta) => Ok(delta.clone()),
                    Err(_) => Err(AppError::ProviderUnavailable("scripted failure".into())),
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }

        fn model_name(&self) -> &str {
            "scripted-chat"
        }
    }

    /// Stream that yields one fragment and then never produces again
    struct StallingCompletion;

    #[async_trait]
    impl CompletionProvider for StallingCompletion {
        async fn complete(&self, _prompt: &str) -> Result<(String, TokenCounts), AppError> {
            Err(AppError::ProviderUnavailable("streaming only".into()))
        }

        async fn complete_stream(
            &self,
            _prompt: &str,
        ) -> Result<BoxStream<'static, Result<CompletionDelta, AppError>>, AppError> {
            let first = Ok(CompletionDelta {
                text: Some("partial ".to_string()),
                usage: None,
            });
            Ok(stream::iter(vec![first]).chain(stream::pending()).boxed())
        }

        fn model_name(&self) -> &str {
            "stalling-chat"
        }
    }

    /// Endless stream that counts how many fragments get pulled off it
    struct DrippingCompletion {
        pulled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CompletionProvider for DrippingCompletion {
        async fn complete(&self, _prompt: &str) -> Result<(String, TokenCounts), AppError> {
            Err(AppError::ProviderUnavailable("streaming only".into()))
        }

        async fn complete_stream(
            &self,
            _prompt: &str,
        ) -> Result<BoxStream<'static, Result<CompletionDelta, AppError>>, AppError> {
            let pulled = self.pulled.clone();
            let deltas = stream::unfold(pulled, |pulled| async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                pulled.fetch_add(1, Ordering::SeqCst);
                let delta = Ok(CompletionDelta {
                    text: Some("drip ".to_string()),
                    usage: None,
                });
                Some((delta, pulled))
            });
            Ok(deltas.boxed())
        }

        fn model_name(&self) -> &str {
            "dripping-chat"
        }
    }

    fn engine_with(
        completions: Arc<ScriptedCompletion>,
        embedder: Arc<CountingEmbedder>,
    ) -> Arc<ContextEngine> {
        Arc::new(ContextEngine::new(
            Arc::new(TextExtractor),
            embedder,
            completions,
            Arc::new(UsageTracker::new()),
            test_config(),
        ))
    }

    fn happy_script() -> Vec<Result<CompletionDelta, AppError>> {
        vec![
            ScriptedCompletion::text("The answer "),
            ScriptedCompletion::text("is here."),
            ScriptedCompletion::usage(20, 5),
        ]
    }

    const DOC: &[u8] = b"The first paragraph talks about alpha things.\n\n\
        The second paragraph talks about beta things.";

    #[tokio::test]
    async fn test_initialize_reaches_ready() {
        let engine = engine_with(
            Arc::new(ScriptedCompletion::new(happy_script())),
            Arc::new(CountingEmbedder::new()),
        );
        assert_eq!(engine.state(), EngineState::Uninitialized);

        let chunks = engine.initialize(DOC.to_vec()).await.unwrap();
        assert!(chunks >= 1);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.chunk_count(), chunks);
    }

    #[tokio::test]
    async fn test_empty_document_fails_without_provider_calls() {
        let completions = Arc::new(ScriptedCompletion::new(happy_script()));
        let embedder = Arc::new(CountingEmbedder::new());
        let engine = engine_with(completions.clone(), embedder.clone());

        let err = engine.initialize(Vec::new()).await.unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed(_)));
        assert_eq!(engine.state(), EngineState::Failed);

        // A subsequent answer reports not-ready and contacts no provider
        let outcome = engine.answer("anything", &[]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.answer, NOT_READY_MESSAGE);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(completions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_answer_returns_completion_and_records_usage() {
        let completions = Arc::new(ScriptedCompletion::new(happy_script()));
        let engine = engine_with(completions, Arc::new(CountingEmbedder::new()));
        engine.initialize(DOC.to_vec()).await.unwrap();

        let outcome = engine.answer("what about alpha?", &[]).await;
        assert!(outcome.success);
        assert_eq!(outcome.answer, "The answer is here.");
        assert!(outcome.chunks_used > 0);
        assert_eq!(outcome.context_pages.len(), outcome.chunks_used);

        let stats = engine.usage.snapshot();
        assert!(stats.chat_calls >= 1);
        assert!(stats.embedding_calls >= 2); // build batch + query
    }

    #[tokio::test]
    async fn test_answer_provider_failure_is_soft() {
        let completions = Arc::new(ScriptedCompletion::new(vec![Err(
            AppError::ProviderUnavailable("down".into()),
        )]));
        let engine = engine_with(completions, Arc::new(CountingEmbedder::new()));
        engine.initialize(DOC.to_vec()).await.unwrap();

        let outcome = engine.answer("q", &[]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.answer, PROVIDER_FAILURE_MESSAGE);
        assert!(outcome.error.is_some());
        // Distinguishable from the not-ready message
        assert_ne!(outcome.answer, NOT_READY_MESSAGE);
    }

    #[tokio::test]
    async fn test_stream_contract_on_success() {
        let completions = Arc::new(ScriptedCompletion::new(happy_script()));
        let engine = engine_with(completions, Arc::new(CountingEmbedder::new()));
        engine.initialize(DOC.to_vec()).await.unwrap();

        let events: Vec<StreamEvent> = engine
            .clone()
            .answer_stream("what about alpha?".into(), Vec::new())
            .collect()
            .await;

        // Metadata first
        assert!(matches!(events[0], StreamEvent::Metadata { .. }));

        // Concatenated content equals the done text; done is last and unique
        let mut concatenated = String::new();
        let mut terminal_count = 0;
        for (i, event) in events.iter().enumerate() {
            match event {
                StreamEvent::Content { text } => concatenated.push_str(text),
                StreamEvent::Done { text } => {
                    terminal_count += 1;
                    assert_eq!(i, events.len() - 1);
                    assert_eq!(*text, concatenated);
                    assert_eq!(text, "The answer is here.");
                }
                StreamEvent::Error { .. } => terminal_count += 1,
                StreamEvent::Metadata { .. } => assert_eq!(i, 0),
            }
        }
        assert_eq!(terminal_count, 1);

        // Streamed usage was folded into the tracker
        let stats = engine.usage.snapshot();
        assert!(stats.total_completion_tokens >= 5);
    }

    #[tokio::test]
    async fn test_stream_midway_failure_emits_error_not_done() {
        let completions = Arc::new(ScriptedCompletion::new(vec![
            ScriptedCompletion::text("frag one "),
            ScriptedCompletion::text("frag two"),
            Err(AppError::ProviderUnavailable("mid-stream".into())),
        ]));
        let engine = engine_with(completions, Arc::new(CountingEmbedder::new()));
        engine.initialize(DOC.to_vec()).await.unwrap();

        let events: Vec<StreamEvent> = engine
            .clone()
            .answer_stream("q".into(), Vec::new())
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], StreamEvent::Metadata { .. }));
        assert!(matches!(events[1], StreamEvent::Content { .. }));
        assert!(matches!(events[2], StreamEvent::Content { .. }));
        assert!(matches!(events[3], StreamEvent::Error { .. }));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_stream_not_ready_is_single_error() {
        let engine = engine_with(
            Arc::new(ScriptedCompletion::new(happy_script())),
            Arc::new(CountingEmbedder::new()),
        );

        let events: Vec<StreamEvent> = engine
            .clone()
            .answer_stream("q".into(), Vec::new())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out_with_error_not_done() {
        let mut config = test_config();
        config.openai.timeout_secs = 1;
        let engine = Arc::new(ContextEngine::new(
            Arc::new(TextExtractor),
            Arc::new(CountingEmbedder::new()),
            Arc::new(StallingCompletion),
            Arc::new(UsageTracker::new()),
            config,
        ));
        engine.initialize(DOC.to_vec()).await.unwrap();

        let events: Vec<StreamEvent> = engine
            .clone()
            .answer_stream("q".into(), Vec::new())
            .collect()
            .await;

        assert!(matches!(events[0], StreamEvent::Metadata { .. }));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { .. })
        ));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
        // The fragment delivered before the stall still made it out
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Content { .. })));
    }

    #[tokio::test]
    async fn test_dropping_stream_consumer_stops_provider() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(ContextEngine::new(
            Arc::new(TextExtractor),
            Arc::new(CountingEmbedder::new()),
            Arc::new(DrippingCompletion {
                pulled: pulled.clone(),
            }),
            Arc::new(UsageTracker::new()),
            test_config(),
        ));
        engine.initialize(DOC.to_vec()).await.unwrap();

        let mut stream = Box::pin(engine.clone().answer_stream("q".into(), Vec::new()));
        assert!(matches!(
            stream.next().await,
            Some(StreamEvent::Metadata { .. })
        ));
        assert!(matches!(
            stream.next().await,
            Some(StreamEvent::Content { .. })
        ));
        drop(stream);

        // At most one in-flight fragment finishes after the disconnect
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let settled = pulled.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_reingestion_replaces_document() {
        let engine = engine_with(
            Arc::new(ScriptedCompletion::new(happy_script())),
            Arc::new(CountingEmbedder::new()),
        );
        let first = engine.initialize(DOC.to_vec()).await.unwrap();
        let second = engine
            .initialize(b"A short replacement document.".to_vec())
            .await
            .unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.chunk_count(), second);
        assert!(second <= first);
    }

    #[test]
    fn test_stream_event_wire_format() {
        let event = StreamEvent::Metadata { chunks_used: 2 };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "metadata", "chunks_used": 2})
        );

        let event = StreamEvent::Content {
            text: "hi".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "content", "text": "hi"})
        );

        let event = StreamEvent::Done {
            text: "full".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "done", "text": "full"})
        );

        let event = StreamEvent::Error {
            message: "nope".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "error", "message": "nope"})
        );
    }
}

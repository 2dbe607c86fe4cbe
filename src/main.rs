use docuchat_rs::config::AppConfig;
use docuchat_rs::engine::ContextEngine;
use docuchat_rs::extract::{DocumentExtractor, PdfExtractor};
use docuchat_rs::providers::{
    CompletionProvider, Embedder, MockCompletion, MockEmbedder, OpenAiChat, OpenAiEmbedder,
};
use docuchat_rs::routes::{self, AppState};
use docuchat_rs::session::SessionStore;
use docuchat_rs::usage::UsageTracker;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const MOCK_EMBEDDING_DIM: usize = 1536;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::build().expect("Failed to load configuration");

    // 2. Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.server.rust_log))
        .init();

    tracing::info!("Starting docuchat-rs...");

    // 3. Select providers
    // "mock" as the API key wires deterministic in-process providers, which
    // keeps local development and CI off the network
    let (embedder, completions): (Arc<dyn Embedder>, Arc<dyn CompletionProvider>) =
        if config.openai.api_key == "mock" {
            tracing::warn!("Using mock providers; answers are canned");
            (
                Arc::new(MockEmbedder::new(MOCK_EMBEDDING_DIM)),
                Arc::new(MockCompletion),
            )
        } else {
            (
                Arc::new(OpenAiEmbedder::new(config.openai.clone())),
                Arc::new(OpenAiChat::new(config.openai.clone())),
            )
        };

    // 4. Build the engine and shared state
    let extractor: Arc<dyn DocumentExtractor> = Arc::new(PdfExtractor);
    let usage = Arc::new(UsageTracker::new());
    let engine = Arc::new(ContextEngine::new(
        extractor,
        embedder,
        completions,
        usage.clone(),
        config.clone(),
    ));
    let session = Arc::new(SessionStore::new());

    // 5. Optional startup ingestion
    if let Some(path) = &config.document.path {
        match tokio::fs::read(path).await {
            Ok(bytes) => match engine.initialize(bytes).await {
                Ok(chunks) => tracing::info!(path, chunks, "Startup document loaded"),
                Err(e) => tracing::error!(path, error = %e, "Startup document ingestion failed"),
            },
            Err(e) => tracing::error!(path, error = %e, "Could not read startup document"),
        }
    }

    // 6. Setup router
    let state = AppState::new(engine, session, usage, &config);
    let app = routes::create_router(state, &config)?;

    // 7. Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub document: DocumentConfig,
    pub retrieval: RetrievalConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub request_timeout_secs: u64,
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    /// API key; "mock" selects the built-in mock providers
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API
    pub api_base: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Timeout applied to every provider call, including each streamed fragment
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentConfig {
    /// Optional document to ingest at startup
    pub path: Option<String>,
    pub max_upload_mb: usize,
    /// Maximum chunk size in characters
    pub chunk_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub embedding_batch_size: usize,
    /// Conversation turns considered when rendering history into the prompt
    pub history_window: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub origins: Vec<String>,
}

impl AppConfig {
    pub fn build() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.rust_log", "info,docuchat_rs=debug")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("server.max_concurrent_requests", 100)?
            .set_default("openai.api_key", "mock")?
            .set_default("openai.api_base", "https://api.openai.com/v1")?
            .set_default("openai.chat_model", "gpt-3.5-turbo")?
            .set_default("openai.embedding_model", "text-embedding-ada-002")?
            .set_default("openai.temperature", 0.1)?
            .set_default("openai.max_tokens", 500)?
            .set_default("openai.timeout_secs", 30)?
            .set_default("document.max_upload_mb", 30)?
            .set_default("document.chunk_size", 1000)?
            .set_default("retrieval.top_k", 3)?
            .set_default("retrieval.similarity_threshold", 0.1)?
            .set_default("retrieval.embedding_batch_size", 100)?
            .set_default("retrieval.history_window", 10)?
            .set_default(
                "cors.origins",
                vec!["http://localhost:3000", "http://127.0.0.1:3000"],
            )?
            // Add in settings from files (optional)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from environment variables with an APP prefix,
            // e.g. `APP_SERVER__PORT=8080` sets `ServerConfig.port`
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("APP")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.document.max_upload_mb * 1024 * 1024
    }
}

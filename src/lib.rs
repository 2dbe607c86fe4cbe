pub mod chunker;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod index;
pub mod metrics;
pub mod prompt;
pub mod providers;
pub mod routes;
pub mod session;
pub mod usage;

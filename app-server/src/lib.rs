//! # App server
//!
//! Configuration, service wiring and the HTTP front end of the review
//! question-answering service. Two binaries use this library:
//! `reviewqa-server` serves the chat endpoint and `reviewqa-ingest` loads
//! the review table into the vector index.

pub mod config;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{ConfigError, DEFAULT_CONFIG_PATH, Secrets, ServiceConfig};
pub use routes::create_router;
pub use services::Services;
pub use state::AppState;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

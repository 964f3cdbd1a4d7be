//! reviewqa-server: the chat HTTP service.
//!
//! 1. Load configuration and secrets
//! 2. Build the embedding, index and generation clients
//! 3. Provision or attach to the index
//! 4. Serve the chat endpoint until Ctrl-C

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use reviewqa_app_server::config::IndexBackend;
use reviewqa_app_server::services::ingest_csv;
use reviewqa_app_server::{
    AppState, DEFAULT_CONFIG_PATH, Secrets, ServiceConfig, Services, create_router, init_tracing,
};

#[derive(Parser, Debug)]
#[command(name = "reviewqa-server", version, about = "Product review question answering over HTTP")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind, overriding `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding `server.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = ServiceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let services = Services::build(&config, &Secrets::from_env())?;

    // The in-memory index starts empty in every process.
    let ingestion = &config.data_ingestion;
    if config.index.backend == IndexBackend::Memory
        && ingestion.seed_memory_index
        && ingestion.csv_path.exists()
    {
        match ingest_csv(
            &config,
            services.embedder.clone(),
            services.index.clone(),
            &ingestion.csv_path,
            ingestion.batch_size,
        )
        .await
        {
            Ok(report) => tracing::info!(%report, "Seeded in-memory index"),
            Err(e) => tracing::warn!(error = %e, "Seeding the in-memory index failed"),
        }
    }

    if let Err(e) = services.retriever.warm_up().await {
        tracing::warn!(error = %e, "Index not ready; retrying on first request");
    }

    let sweeper = config.conversation.session_ttl().map(|ttl| {
        services
            .sessions
            .spawn_sweeper(ttl, config.conversation.sweep_interval())
    });

    let router = create_router(AppState::new(services.engine.clone()));
    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    services.sessions.clear().await;
    tracing::info!("Server stopped");
    Ok(())
}

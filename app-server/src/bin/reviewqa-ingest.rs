//! reviewqa-ingest: load the review table into the vector index.
//!
//! Only documents the index does not already hold are embedded and
//! written, so running it twice is harmless.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use reviewqa_app_server::services::{build_embedder, build_index, ingest_csv};
use reviewqa_app_server::{DEFAULT_CONFIG_PATH, Secrets, ServiceConfig, init_tracing};
use reviewqa_retrieval::Retriever;

#[derive(Parser, Debug)]
#[command(name = "reviewqa-ingest", version, about = "Ingest product reviews into the vector index")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Review table, overriding `data_ingestion.csv_path`.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Documents embedded and upserted together.
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Run this query against the index after ingesting and print the hits.
    #[arg(long)]
    query: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = ServiceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let secrets = Secrets::from_env();
    let embedder = build_embedder(&config, &secrets)?;
    let index = build_index(&config, &secrets)?;

    let csv = cli.csv.unwrap_or_else(|| config.data_ingestion.csv_path.clone());
    let batch_size = cli.batch_size.unwrap_or(config.data_ingestion.batch_size).max(1);
    let report = ingest_csv(&config, embedder.clone(), index.clone(), &csv, batch_size)
        .await
        .with_context(|| format!("ingesting {}", csv.display()))?;
    println!("{report}");

    if let Some(query) = cli.query {
        let retriever = Retriever::new(embedder, index, config.index_spec())
            .with_config(config.retriever_config())
            .with_policy(config.index.provisioning.clone());
        let result = retriever.retrieve_default(&query).await?;
        println!("\nTop {} results for {query:?}:", result.len());
        for (rank, hit) in result.iter().enumerate() {
            let product = hit.document.product_name().unwrap_or_default();
            println!("{:>2}. [{:.3}] {product}: {}", rank + 1, hit.score, hit.document.content);
        }
    }
    Ok(())
}

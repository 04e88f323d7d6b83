mod cli;
mod commands;

use crate::cli::{LogFormat, CLI};
use anyhow::Context;
use clap::Parser;
use linkstore_storage::LinkStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CLI::parse();
    init_tracing(cli.log_format);

    let config = cli.store_config();
    info!(
        workers = config.pipeline.workers,
        database = config.database_dsn.is_some(),
        file = ?config.file_storage_path,
        "opening link store"
    );

    let store = LinkStore::open(config)
        .await
        .context("failed to open link store")?;

    let output = commands::run(&store, cli.command).await;
    let closed = store.close().await;

    let output = output?;
    closed.context("failed to close link store")?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Logs go to stderr so stdout stays machine readable.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

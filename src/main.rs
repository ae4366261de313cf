//! Temporal-Versioning: Main entry point

use anyhow::Context;
use clap::Parser;
use temporal_versioning::cli::{execute, Cli};
use temporal_versioning::config::VersioningConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout carries the generated SQL
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = match &cli.config {
        Some(path) => VersioningConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => VersioningConfig::default(),
    };

    let statements = execute(cli.command, &config)
        .await
        .context("generating SQL")?;
    for statement in statements {
        println!("{statement};");
    }
    Ok(())
}

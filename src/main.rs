//! kihub CLI entry point.

use anyhow::Result;
use clap::Parser;
use kihub::cli::{commands, Cli, Commands};
use kihub::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref().map(Settings::expand_path);
    let settings = Settings::load_from(config_path.as_ref())?;

    // -v flags win over the configured level
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("kihub={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    std::fs::create_dir_all(settings.data_dir())?;

    match &cli.command {
        Commands::Ingest { files, chunk_size, overlap, id } => {
            commands::run_ingest(files, *chunk_size, *overlap, id.clone(), settings).await?;
        }

        Commands::Ask { question, web, k, max_web_results } => {
            commands::run_ask(question, *web, *k, *max_web_results, settings).await?;
        }

        Commands::Chat { web, k } => {
            commands::run_chat(*web, *k, settings).await?;
        }

        Commands::Search { query, k } => {
            commands::run_search(query, *k, settings).await?;
        }

        Commands::List => {
            commands::run_list(settings).await?;
        }

        Commands::Remove { document_id } => {
            commands::run_remove(document_id, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, config_path, settings)?;
        }
    }

    Ok(())
}

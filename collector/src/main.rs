use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use lib_stream::configs::load_bearer;
use lib_stream::core::Dispatcher;
use lib_stream::ingestors::{HttpStreamTransport, StreamController};
use lib_stream::retrieve::RulesClient;
use lib_stream::storage::RotatingFileWriter;

mod config;
mod logger;
mod shell;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config(config::Config::parse())?;
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let settings = config.settings();
    settings.validate()?;

    let bearer_file = config
        .bearer_file
        .clone()
        .context("No bearer file configured")?;
    let bearer = load_bearer(&bearer_file)
        .with_context(|| format!("Cannot load the bearer token from {}", bearer_file.display()))?;

    let writer = Arc::new(RotatingFileWriter::new(&settings.save_path, settings.max_file_size)?);
    let transport = Arc::new(HttpStreamTransport::new(
        settings.stream_url.clone(),
        bearer.clone(),
        settings.transport_timeouts(),
    )?);
    let controller = Arc::new(
        StreamController::new(transport, Arc::new(Dispatcher::new()))
            .with_policy(settings.reconnect_policy())
            .with_max_line_bytes(settings.max_line_bytes),
    );
    let rules = RulesClient::new(&settings.rules_url, &bearer)?;

    let shell = shell::Shell::new(controller, writer, rules, settings.refresh)?;
    log::info!("Collector ready, saving to {}", settings.save_path.display());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = shell.run(stdin) => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
            println!();
        }
    }

    shell.shutdown().await;
    log::info!("Shutdown complete.");
    Ok(())
}

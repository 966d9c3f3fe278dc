// src/main.rs

mod cli;
mod config;
mod credentials;
mod dispatch;
mod error;
mod llm;
mod render;

use anyhow::Context;
use clap::Parser;
use config::MarkupMode;
use credentials::{default_credentials_path, CredentialStore};
use dispatch::Dispatcher;
use render::{converter_for, Renderer};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Send one prompt to several hosted language models at once.
#[derive(Parser, Debug)]
#[command(name = "fanout-chat", version, about)]
struct Cli {
    /// JSON config file (defaults to <config dir>/fanout-chat/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where saved API keys live.
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// How responses are rendered.
    #[arg(long, value_enum)]
    markup: Option<MarkupMode>,

    /// Ignore results from a dispatch that a newer one has replaced.
    #[arg(long)]
    discard_stale: bool,

    /// Send this prompt once, wait for every slot, then exit.
    prompt: Vec<String>,
}

#[cfg(feature = "logging")]
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // stderr keeps log lines out of the slot output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .init();
}

#[cfg(not(feature = "logging"))]
fn init_tracing() {}

#[tokio::main]
async fn main() -> error::Result<()> {
    // --- Load .env file ---
    // Pinned keys may live there, so this runs before the config is built.
    dotenvy::dotenv().ok();

    init_tracing();
    let cli = Cli::parse();

    info!("Starting fan-out chat...");

    let mut config = config::Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(markup) = cli.markup {
        config.markup = markup;
    }
    if cli.discard_stale {
        config.discard_stale_results = true;
    }
    let config = Arc::new(config);

    let credentials_path = cli.credentials.unwrap_or_else(default_credentials_path);
    let credentials = Arc::new(CredentialStore::open(&credentials_path));

    let renderer = Renderer::new(&config.slots, converter_for(config.markup), config.discard_stale_results).with_echo(true);
    let dispatcher = Dispatcher::new(Client::new(), Arc::clone(&config), credentials, renderer);

    if !cli.prompt.is_empty() {
        let prompt = cli.prompt.join(" ");
        match dispatcher.dispatch(&prompt) {
            Ok(handle) => handle.join().await,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    if let Err(e) = cli::repl::run_interactive(&dispatcher).await {
        error!("Application error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use countdown_sync::{AudioCue, SyncConfig};
use tab_bus::LocalBus;
use tab_store::{FileStore, InMemoryStore, KeyValueStore};
use tokio::io::BufReader;
use tracing::info;

mod cli;
mod console;
mod logging;

use cli::Cli;
use console::{Console, TerminalBell, HELP};
use logging::LogConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("failed to initialise logging")?;

    let mut config = SyncConfig::from_env();
    if let Some(seconds) = cli.default_seconds {
        config.default_seconds = seconds;
    }

    let store: Arc<dyn KeyValueStore> = match &cli.store {
        Some(path) => FileStore::open(path)
            .with_context(|| format!("failed to open store {}", path.display()))?,
        None => InMemoryStore::new(),
    };
    let cue: Arc<dyn AudioCue> = Arc::new(TerminalBell::new(cli.mute));
    let bus = Arc::new(LocalBus::new());

    info!(
        tabs = cli.tabs,
        channel = %config.channel,
        default_seconds = config.default_seconds,
        persistent = cli.store.is_some(),
        "starting countdown tabs"
    );

    let mut console = Console::new(config, bus, store, cue);
    for _ in 0..cli.tabs.max(1) {
        console.open_tab();
    }
    println!("{HELP}");

    let outcome = console.run(BufReader::new(tokio::io::stdin())).await;
    console.shutdown().await;
    outcome
}

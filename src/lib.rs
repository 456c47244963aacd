pub mod app;
pub mod audit;
pub mod bus;
pub mod cli;
pub mod core;
pub mod events;
pub mod hub;
pub mod notify;
pub mod providers;
pub mod reconciler;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod store;

use crate::core::config::AppConfig;
use anyhow::Result;
use tracing::{debug, info};

pub enum AppCommand {
    Serve,
    Sync,
    Rates { base: Option<String> },
    Logs { limit: usize },
    Listen,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("ratesync starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Serve => app::serve(&config).await,
        AppCommand::Sync => cli::sync::run(&config).await,
        AppCommand::Rates { base } => cli::rates::run(&config, base.as_deref()).await,
        AppCommand::Logs { limit } => cli::logs::run(&config, limit).await,
        AppCommand::Listen => cli::listen::run(&config).await,
    }
}

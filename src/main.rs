use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ratesync::cli::setup::setup;
use ratesync::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for ratesync::AppCommand {
    fn from(cmd: Commands) -> ratesync::AppCommand {
        match cmd {
            Commands::Serve => ratesync::AppCommand::Serve,
            Commands::Sync => ratesync::AppCommand::Sync,
            Commands::Rates { base } => ratesync::AppCommand::Rates { base },
            Commands::Logs { limit } => ratesync::AppCommand::Logs { limit },
            Commands::Listen => ratesync::AppCommand::Listen,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the scheduler and serve the HTTP and WebSocket API
    Serve,
    /// Fetch and apply the latest rates once
    Sync,
    /// Display stored rates
    Rates {
        /// Only show rates quoted against this base currency
        #[arg(short, long)]
        base: Option<String>,
    },
    /// Display recent task log entries
    Logs {
        /// Maximum number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print currency updates published on the message bus
    Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => ratesync::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

//! keeper-check: offline inspection of the session keeper's credential store.
//!
//! ## Subcommands
//!
//! - `list`: valid and invalid stored accounts with their save times
//! - `expiry`: predicted cookie expiry per account
//! - `invalidate`: move a credential aside so it is not restored
//! - `test-alert`: send a test message through the account's Telegram bot

mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keeper_core::{load_config, AccountId};

#[derive(Parser)]
#[command(name = "keeper-check")]
#[command(about = "Inspect stored platform sessions")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.session-keeper/keeper.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Sessions directory, overriding the configured one
    #[arg(long, global = true, value_name = "DIR")]
    sessions_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored credentials
    List,

    /// Report predicted session expiry
    Expiry {
        /// Only this account
        #[arg(value_name = "ACCOUNT")]
        account: Option<AccountId>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Mark a stored credential invalid
    Invalidate {
        #[arg(value_name = "ACCOUNT")]
        account: AccountId,
    },

    /// Send a test alert to the account's Telegram chat
    TestAlert {
        #[arg(value_name = "ACCOUNT")]
        account: AccountId,
    },
}

#[tokio::main]
async fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let mut config = match load_config(cli.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.sessions_dir {
        config.storage.sessions_dir = dir;
    }

    let result = match cli.command {
        Commands::List => commands::list(&config),
        Commands::Expiry { account, json } => commands::expiry(&config, account, json),
        Commands::Invalidate { account } => commands::invalidate(&config, account),
        Commands::TestAlert { account } => commands::test_alert(&config, account).await,
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "keeper-check failed");
        std::process::exit(1);
    }
}

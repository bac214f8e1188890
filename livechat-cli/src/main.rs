//! Main entry point for the LiveChat CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;

mod commands;
mod logging;

/// LiveChat CLI
#[derive(Parser)]
#[command(name = "livechat")]
#[command(about = "Command-line client for managed live-chat rooms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the LiveChat CLI
#[derive(Subcommand)]
enum Commands {
    /// Join the chat room and chat interactively
    Chat(commands::chat::ChatArgs),

    /// List the chat rooms known to the proxy
    Rooms(commands::rooms::RoomsArgs),

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(
            long,
            short,
            value_enum,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: Shell,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml or json). Defaults to yaml.
        #[arg(
            long,
            short,
            help = "Format of the configuration file to generate (yaml or json). Defaults to yaml."
        )]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat(args) => commands::chat::handle_chat(args).await?,
        Commands::Rooms(args) => commands::rooms::handle_rooms(args).await?,
        Commands::Completion { shell } => commands::completion::generate_completion(shell),
        Commands::Config { format } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            commands::config::generate_config(&format)?;
        }
    }

    Ok(())
}

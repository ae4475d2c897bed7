//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// switchboard - send and receive chat messages through a switchboard server
#[derive(Debug, Parser)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "SWITCHBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server address (host:port)
    #[arg(long, short, env = "SWITCHBOARD_SERVER")]
    pub server: Option<String>,

    /// Username to log in as
    #[arg(long, short, env = "SWITCHBOARD_USER")]
    pub user: Option<String>,

    /// Seconds a call waits for the server's response
    #[arg(long)]
    pub call_timeout: Option<u64>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one message and exit once the server accepted it
    Send {
        /// Recipient username
        #[arg(long, short)]
        to: String,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Log in and print incoming messages until interrupted
    Listen {
        /// Print each message as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Dump,
    /// Print the configuration file path
    Path,
}

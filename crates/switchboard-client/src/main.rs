//! switchboard CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use switchboard_client::cli::{Cli, Command, ConfigAction};
use switchboard_client::commands;
use switchboard_client::config::ClientConfig;
use switchboard_client::error::{ClientError, ClientResult};
use switchboard_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::cli_debug().with_level(tracing::Level::WARN)
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(server) = cli.server {
        config.server.address = server;
    }
    if let Some(secs) = cli.call_timeout {
        config.server.call_timeout_secs = secs;
    }
    if let Some(user) = cli.user {
        config.username = Some(user);
    }
    config.validate()?;

    match cli.command {
        Command::Send { to, text } => {
            let username = require_username(&config)?;
            commands::chat::send(&config, username, &to, &text.join(" ")).await
        }
        Command::Listen { json } => {
            let username = require_username(&config)?;
            commands::chat::listen(&config, username, json).await
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}

fn require_username(config: &ClientConfig) -> ClientResult<&str> {
    config
        .username
        .as_deref()
        .ok_or_else(|| ClientError::Config("no username: pass --user or set `username`".into()))
}

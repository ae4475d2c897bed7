//! switchboard-server entry point.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use switchboard_core::{EventFeed, TracingConfig, TracingOutputFormat, init_tracing};
use switchboard_server::{
    ChatServer, DEFAULT_BIND_ADDRESS, ServerConfig, ServerResult, shutdown_signal,
};

/// Chat broker with store-and-forward delivery.
#[derive(Debug, Parser)]
#[command(name = "switchboard-server", version, about)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "SWITCHBOARD_BIND", default_value = DEFAULT_BIND_ADDRESS)]
    bind: SocketAddr,

    /// Seconds between user status reports (0 disables them).
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    status_interval: u64,

    /// Maximum concurrent connections.
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,

    /// Reject chat messages sent before a successful login.
    #[arg(long)]
    require_login: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging.
    #[arg(short = 'v', long)]
    debug: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        let interval = (self.status_interval > 0).then(|| Duration::from_secs(self.status_interval));
        ServerConfig::new(self.bind)
            .with_max_connections(self.max_connections)
            .with_user_status_interval(interval)
            .with_require_login(self.require_login)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::daemon()
    };
    if cli.json_logs {
        tracing = tracing.with_format(TracingOutputFormat::Json);
    }
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

async fn run(cli: Cli) -> ServerResult<()> {
    // Events are mirrored to tracing, so the subscriber is the display.
    let server = ChatServer::bind(cli.server_config(), EventFeed::disabled()).await?;
    server.run_until_shutdown(shutdown_signal()).await
}

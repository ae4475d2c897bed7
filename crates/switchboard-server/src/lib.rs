//! Chat broker: per-connection sessions, user registry and store-and-forward
//! mailboxes.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchboard_core::EventFeed;
//! use switchboard_server::{ChatServer, ServerConfig, shutdown_signal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (feed, mut events) = EventFeed::channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{event}");
//!         }
//!     });
//!
//!     let server = ChatServer::bind(ServerConfig::default(), feed).await?;
//!     server.run_until_shutdown(shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod listener;
mod registry;
mod session;
mod signals;
mod status;

pub use config::{DEFAULT_BIND_ADDRESS, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use listener::ChatServer;
pub use registry::{LoginOutcome, Session, UserRegistry, UserStatus};
pub use session::SessionHandler;
pub use signals::shutdown_signal;
pub use status::{format_status_report, spawn_status_reporter};

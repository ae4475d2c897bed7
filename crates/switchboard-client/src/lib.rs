//! Multiplexed chat client and the `switchboard` CLI.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchboard_client::ChatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ChatClient::connect("127.0.0.1:5555").await?;
//!     let mut messages = client.messages().expect("feed taken once");
//!
//!     client.login("alice").await?;
//!     client.send_message("hi bob", "bob").await?;
//!
//!     while let Some(message) = messages.recv().await {
//!         println!("{}: {}", message.from, message.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;

pub use cli::Cli;
pub use config::ClientConfig;
pub use connection::{ChatClient, DEFAULT_CALL_TIMEOUT, IncomingMessages};
pub use error::{ClientError, ClientResult};

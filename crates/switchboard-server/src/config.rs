//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ServerError, ServerResult};

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5555";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    pub bind_address: SocketAddr,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Period of the user status report; `None` disables it.
    pub user_status_interval: Option<Duration>,

    /// Answer `NotAuthenticated` to chat messages sent before a successful login.
    pub require_login: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 5555)),
            max_connections: 1024,
            user_status_interval: Some(Duration::from_secs(5)),
            require_login: false,
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration with the given listen address.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set the user status report period.
    pub fn with_user_status_interval(mut self, interval: Option<Duration>) -> Self {
        self.user_status_interval = interval;
        self
    }

    /// Builder: enforce login before chat messages.
    pub fn with_require_login(mut self, require: bool) -> Self {
        self.require_login = require;
        self
    }

    /// Checks the values a listener cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_connections == 0 {
            return Err(ServerError::config("max_connections must be at least 1"));
        }
        if self.user_status_interval == Some(Duration::ZERO) {
            return Err(ServerError::config(
                "user_status_interval must be positive (use None to disable)",
            ));
        }
        Ok(())
    }
}

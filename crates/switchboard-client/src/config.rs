//! Client configuration.
//!
//! Settings live in `~/.config/switchboard/config.toml` by default:
//!
//! ```toml
//! username = "alice"
//!
//! [server]
//! address = "127.0.0.1:5555"
//! connect_timeout_secs = 5
//! call_timeout_secs = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Configuration for the switchboard client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default username to log in as.
    pub username: Option<String>,

    /// Server/connection settings.
    pub server: ServerSettings,
}

/// Server/connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server address, `host:port`.
    pub address: String,

    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Time a call waits for its response, in seconds.
    pub call_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5555".to_string(),
            connect_timeout_secs: 5,
            call_timeout_secs: 5,
        }
    }
}

impl ServerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl ClientConfig {
    /// Loads configuration from the default path, or defaults if it does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parses a TOML document.
    pub fn parse(content: &str) -> ClientResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes back to TOML.
    pub fn to_toml(&self) -> ClientResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.server.address.trim().is_empty() {
            return Err(ClientError::Config("server.address must not be empty".into()));
        }
        if self.server.call_timeout_secs == 0 {
            return Err(ClientError::Config(
                "server.call_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("switchboard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.username, None);
        assert_eq!(config.server.address, "127.0.0.1:5555");
        assert_eq!(config.server.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ClientConfig::parse(
            r#"
            username = "alice"

            [server]
            address = "chat.example.org:7000"
            "#,
        )
        .unwrap();

        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.server.address, "chat.example.org:7000");
        assert_eq!(config.server.call_timeout_secs, 5);
    }

    #[test]
    fn empty_file_is_default() {
        let config = ClientConfig::parse("").unwrap();
        assert_eq!(config.server.address, "127.0.0.1:5555");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ClientConfig::parse("[server]\ncall_timeout_secs = 0\n"),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::parse("[server]\naddress = \"\"\n"),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::parse("username = 3"),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn toml_dump_parses_back() {
        let mut config = ClientConfig::default();
        config.username = Some("bob".into());
        let dumped = config.to_toml().unwrap();
        let parsed = ClientConfig::parse(&dumped).unwrap();
        assert_eq!(parsed.username.as_deref(), Some("bob"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "username = \"carol\"\n[server]\ncall_timeout_secs = 2\n").unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.username.as_deref(), Some("carol"));
        assert_eq!(config.server.call_timeout(), Duration::from_secs(2));

        let missing = ClientConfig::load_from(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ClientError::Config(_))));
    }

    #[test]
    fn default_path_ends_with_config_toml() {
        let path = ClientConfig::default_path();
        assert!(path.ends_with("switchboard/config.toml"));
    }
}

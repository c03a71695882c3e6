//! # Configuration Management
//!
//! Centralized configuration for the session server.
//!
//! The configuration is loaded once at startup and handed to the server as an
//! `Arc<ServerConfig>`; nothing reads it through a global.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()` / `apply_env()`

use crate::error::{ProtocolError, Result};
use crate::utils::compression::CompressionKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Protocol signature sent at the start of every handshake.
pub const PROTOCOL_SIGNATURE: [u8; 2] = [0xa0, 0xd0];

/// Current revision of the network protocol
pub const PROTOCOL_REVISION: u16 = 0;

/// Engine version that clients must match exactly
pub const VERSION_MAJOR: u16 = 0;
pub const VERSION_MINOR: u16 = 1;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 24020;

/// Length of the random login challenge, in bytes
pub const CHALLENGE_LENGTH: usize = 32;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub login: LoginConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub bans: BanConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `SESSION_PROTOCOL_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("SESSION_PROTOCOL_ADDRESS") {
            self.network.address = addr;
        }

        if let Ok(max) = std::env::var("SESSION_PROTOCOL_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                self.network.max_connections = val;
            }
        }

        if let Ok(max) = std::env::var("SESSION_PROTOCOL_MAX_PER_ADDRESS") {
            if let Ok(val) = max.parse::<usize>() {
                self.network.max_per_address = val;
            }
        }

        if let Ok(timeout) = std::env::var("SESSION_PROTOCOL_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                self.network.timeout = Duration::from_millis(val);
            }
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.general.validate());
        errors.extend(self.network.validate());
        errors.extend(self.login.validate());
        errors
    }

    /// Advisories that do not stop the server from starting.
    pub fn warnings(&self) -> Vec<String> {
        self.logging.warnings()
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Identity advertised to clients in `ConnectionAccepted`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub server_name: String,
    pub news_url: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            server_name: String::from("xVector Server"),
            news_url: String::new(),
        }
    }
}

impl GeneralConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let name_len = self.server_name.chars().count();
        if name_len == 0 {
            errors.push("Server name cannot be empty".to_string());
        } else if name_len > crate::core::packet::MAX_SERVER_NAME_CHARS {
            errors.push(format!(
                "Server name too long: {name_len} characters (maximum: 64)"
            ));
        }

        let url_len = self.news_url.chars().count();
        if url_len > crate::core::packet::MAX_NEWS_URL_CHARS {
            errors.push(format!(
                "News URL too long: {url_len} characters (maximum: 256)"
            ));
        }

        errors
    }
}

/// Listener and admission-control settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// IPv4 listen address (e.g., "0.0.0.0:24020")
    pub address: String,

    /// Optional IPv6 listen address (e.g., "[::]:24020")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<String>,

    /// Maximum number of live connections
    pub max_connections: usize,

    /// Maximum number of live connections from a single address
    pub max_per_address: usize,

    /// Inactivity window after which a connection is closed.
    /// A keep-alive probe goes out at half of it.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// How often the reactor sweeps connections for timeouts
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            ipv6_address: None,
            max_connections: 50,
            max_per_address: 2,
            timeout: Duration::from_secs(60),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:24020')",
                self.address
            ));
        }

        if let Some(ref v6) = self.ipv6_address {
            match v6.parse::<std::net::SocketAddr>() {
                Ok(addr) if addr.is_ipv6() => {}
                _ => errors.push(format!(
                    "Invalid IPv6 address format: '{v6}' (expected format: '[::]:24020')"
                )),
            }
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        if self.max_per_address == 0 {
            errors.push("Max connections per address must be greater than 0".to_string());
        } else if self.max_per_address > self.max_connections {
            errors.push(format!(
                "Max connections per address ({}) exceeds max connections ({})",
                self.max_per_address, self.max_connections
            ));
        }

        if self.timeout.as_secs() < 2 {
            errors.push("Connection timeout too short (minimum: 2s)".to_string());
        } else if self.timeout.as_secs() > 3600 {
            errors.push("Connection timeout too long (maximum: 1 hour)".to_string());
        }

        if self.tick_interval.as_millis() < 10 {
            errors.push("Tick interval too short (minimum: 10ms)".to_string());
        } else if self.tick_interval >= self.timeout / 2 {
            errors.push("Tick interval must be shorter than half the timeout".to_string());
        }

        errors
    }
}

/// Login and registration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Minimum time between two login attempts on one connection
    #[serde(with = "duration_serde")]
    pub login_delay: Duration,

    /// Refuse in-client registration
    pub registration_disabled: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            login_delay: Duration::from_secs(5),
            registration_disabled: false,
        }
    }
}

impl LoginConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.login_delay.as_secs() > 300 {
            errors.push("Login delay too long (maximum: 300s)".to_string());
        }
        errors
    }
}

/// Wire protocol settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Body compression algorithm; clients must use the same one
    pub compression: CompressionKind,
}

/// IP ban list settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BanConfig {
    /// TOML file the ban list is loaded from and saved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Advisories about settings that are legal but probably unintended.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.json_format && self.log_level == Level::TRACE {
            warnings.push(
                "Trace-level JSON logging is very verbose - not recommended for production"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

//! # Configuration Management
//!
//! Centralized configuration for a broker node.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Sections
//! - `node`: node identity and namespace (namespaces isolate clusters on a shared bus)
//! - `stream`: flow control for streamed parameters and results
//! - `transport`: serialization format, compression, payload ceiling
//! - `call`: default call deadline
//! - `logging`: tracing subscriber settings

use crate::core::serialization::SerializationFormat;
use crate::error::{BridgeError, Result};
use crate::utils::compression::CompressionKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Current frame format version for byte-stream transporters
pub const FRAME_VERSION: u8 = 1;

/// Magic bytes that open every frame ("SBRG")
pub const MAGIC_BYTES: [u8; 4] = [0x53, 0x42, 0x52, 0x47];

/// Max allowed payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Default number of unacknowledged `STREAM_DATA` packets before a producer pauses
pub const DEFAULT_ACK_WINDOW: usize = 16;

/// Default number of chunks a `StreamWriter` buffers before `write` waits
pub const DEFAULT_WRITE_BUFFER: usize = 16;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub call: CallConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Defaults with the given node id.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self::default_with_overrides(|c| c.node.node_id = node_id.into())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| BridgeError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| BridgeError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| BridgeError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(node_id) = std::env::var("STREAM_BRIDGE_NODE_ID") {
            config.node.node_id = node_id;
        }

        if let Ok(namespace) = std::env::var("STREAM_BRIDGE_NAMESPACE") {
            config.node.namespace = namespace;
        }

        if let Ok(window) = std::env::var("STREAM_BRIDGE_ACK_WINDOW") {
            config.stream.ack_window = window.parse::<usize>().map_err(|e| {
                BridgeError::ConfigError(format!("STREAM_BRIDGE_ACK_WINDOW: {e}"))
            })?;
        }

        if let Ok(flow) = std::env::var("STREAM_BRIDGE_FLOW_CONTROL") {
            config.stream.flow_control = flow.parse::<bool>().map_err(|e| {
                BridgeError::ConfigError(format!("STREAM_BRIDGE_FLOW_CONTROL: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("STREAM_BRIDGE_CALL_TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|e| {
                BridgeError::ConfigError(format!("STREAM_BRIDGE_CALL_TIMEOUT_MS: {e}"))
            })?;
            config.call.default_timeout = Some(Duration::from_millis(millis));
        }

        Ok(config)
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
            .map_err(|e| BridgeError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| BridgeError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.node.validate());
        errors.extend(self.stream.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.call.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Node identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Unique node name on the transporter
    pub node_id: String,

    /// Cluster namespace; nodes only see peers in the same namespace
    #[serde(default)]
    pub namespace: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::from("node-1"),
            namespace: String::new(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.node_id.is_empty() {
            errors.push("Node id cannot be empty".to_string());
        } else if self.node_id.len() > 128 {
            errors.push(format!(
                "Node id too long: {} characters (maximum: 128)",
                self.node_id.len()
            ));
        }

        if self.node_id.contains(char::is_whitespace) || self.namespace.contains(char::is_whitespace)
        {
            errors.push("Node id and namespace cannot contain whitespace".to_string());
        }

        errors
    }
}

/// Flow control for streamed parameters and results
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Ask consumers to acknowledge chunks so producers can pause
    pub flow_control: bool,

    /// Unacknowledged `STREAM_DATA` packets allowed before the producer pauses
    pub ack_window: usize,

    /// Chunks a local `StreamWriter` buffers before `write` waits
    pub write_buffer: usize,

    /// Answer `STREAM_DATA` for unknown streams with a `STREAM_ERROR` so the producer stops
    pub reset_orphans: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flow_control: true,
            ack_window: DEFAULT_ACK_WINDOW,
            write_buffer: DEFAULT_WRITE_BUFFER,
            reset_orphans: true,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.flow_control && self.ack_window == 0 {
            errors.push("Ack window must be greater than 0 when flow control is enabled".to_string());
        } else if self.ack_window > 1_000_000 {
            errors.push(format!(
                "Ack window too large: {} (max recommended: 1,000,000)",
                self.ack_window
            ));
        }

        if self.write_buffer == 0 {
            errors.push("Write buffer must be greater than 0".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Serialization format for outgoing packets (incoming packets self-describe)
    #[serde(default)]
    pub serialization: SerializationFormat,

    /// Compression for packet bodies, if any
    #[serde(default)]
    pub compression: Option<CompressionKind>,

    /// Minimum body size (bytes) before compression is attempted
    #[serde(default)]
    pub compression_threshold_bytes: usize,

    /// Maximum allowed payload size in bytes
    pub max_payload_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            serialization: SerializationFormat::Bincode,
            compression: None,
            compression_threshold_bytes: 512,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_payload_size
            ));
        }

        if self.compression.is_some() && self.compression_threshold_bytes > self.max_payload_size
        {
            errors.push("Compression threshold cannot be larger than max payload size".to_string());
        }

        errors
    }
}

/// Call defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CallConfig {
    /// Deadline applied to calls that do not set their own
    #[serde(default, with = "option_duration_serde")]
    pub default_timeout: Option<Duration>,
}

impl CallConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(timeout) = self.default_timeout {
            if timeout.as_millis() < 10 {
                errors.push("Default call timeout too short (minimum: 10ms)".to_string());
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("stream-bridge"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for optional Duration serialization (milliseconds)
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
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

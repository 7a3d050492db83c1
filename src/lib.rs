//! Vantage InFusion protocol client
//!
//! Implements the InFusion controller's line-oriented control protocol and
//! its XML configuration protocol:
//!
//! - Line framing and classification of the command/event stream
//! - Session bootstrap into event-streaming mode
//! - Interface capability negotiation with answer correlation
//! - Configuration database download, base64 extraction and local caching
//! - Typed project-tree records and accessory discovery
//!
//! The controller (firmware 3.2 and later) must be configured without
//! encryption or password protection; the client speaks plain TCP.

mod client;
mod configuration;
mod dimmer;
mod error;
mod framer;
mod objects;
mod parser;
mod platform;
mod protocol;
mod thermostat;

pub use client::{VantageClient, VantageEvent};
pub use configuration::{ConfigurationAssembler, ConfigurationDecoder, Database, DecodeOutcome};
pub use dimmer::VantageDimmer;
pub use error::{VantageError, VantageResult};
pub use framer::LineFramer;
pub use objects::{AreaObject, HvacObject, LoadKind, LoadObject, ProjectDatabase};
pub use parser::parse_line;
pub use platform::{Accessory, VantagePlatform};
pub use protocol::{interfaces, methods};
pub use thermostat::VantageThermostat;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// TCP port of the command/event connection
pub const VANTAGE_COMMAND_PORT: u16 = 3001;

/// TCP port of the configuration connection
pub const VANTAGE_CONFIGURATION_PORT: u16 = 2001;

/// Default cache file name, placed in the system temp directory
pub const CACHE_FILE_NAME: &str = "vantage.dc";

/// Client configuration
///
/// Deserializable from the platform's JSON config; every field except `host`
/// has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VantageConfig {
    /// Controller address
    pub host: String,
    /// Command/event connection port (default: 3001)
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    /// Configuration connection port (default: 2001)
    #[serde(default = "default_configuration_port")]
    pub configuration_port: u16,
    /// Where the downloaded configuration database is cached. Presence of
    /// this file short-circuits future downloads until it is removed.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Minimum delay between outbound commands, a throttle for the
    /// controller's processing rate (default: 50 ms)
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    /// TCP connection timeout (default: 30 seconds)
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// How long an interface-support query waits for its answer before
    /// resolving as unsupported (default: 10 seconds)
    #[serde(default = "default_query_timeout_secs")]
    pub interface_query_timeout_secs: u64,
    /// Optional VID-to-name overrides for discovered accessories
    #[serde(default)]
    pub name_mapping: HashMap<String, String>,
}

fn default_command_port() -> u16 {
    VANTAGE_COMMAND_PORT
}

fn default_configuration_port() -> u16 {
    VANTAGE_CONFIGURATION_PORT
}

fn default_cache_path() -> PathBuf {
    std::env::temp_dir().join(CACHE_FILE_NAME)
}

fn default_send_interval_ms() -> u64 {
    50
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_query_timeout_secs() -> u64 {
    10
}

impl VantageConfig {
    /// Configuration for a controller at `host` with all defaults.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            command_port: default_command_port(),
            configuration_port: default_configuration_port(),
            cache_path: default_cache_path(),
            send_interval_ms: default_send_interval_ms(),
            connection_timeout_secs: default_connection_timeout_secs(),
            interface_query_timeout_secs: default_query_timeout_secs(),
            name_mapping: HashMap::new(),
        }
    }

    /// Load from a JSON platform config file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> VantageResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VantageError::ConfigLoad(format!("{}: {}", path.as_ref().display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| VantageError::ConfigLoad(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// Get the inter-command throttle as a Duration
    pub fn send_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.send_interval_ms)
    }

    /// Get the connection timeout as a Duration
    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get the interface-query timeout as a Duration
    pub fn interface_query_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interface_query_timeout_secs)
    }
}

/// Raised (and logged) when an interface-support answer never arrives; the
/// query then resolves as unsupported instead of hanging.
#[derive(Debug, Clone, thiserror::Error)]
#[error("interface query for VID {vid}, interface {interface_id} got no answer after {waited_secs}s")]
pub struct InterfaceQueryTimeout {
    pub vid: u32,
    pub interface_id: u32,
    pub waited_secs: u64,
}

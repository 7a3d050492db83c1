//! Vantage error types
//!
//! Provides structured error types for controller operations.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Vantage client errors
#[derive(Debug, Clone)]
pub enum VantageError {
    /// Connection to the controller failed
    ConnectionFailed(String),
    /// Connection timeout with context
    ConnectionTimeout {
        host: String,
        port: u16,
        duration: Duration,
    },
    /// Not connected to the controller
    NotConnected,
    /// Send channel closed
    ChannelClosed(String),
    /// Configuration database could not be decoded
    DatabaseParse(String),
    /// Cache file could not be read or written
    CacheIo { path: PathBuf, message: String },
    /// Platform configuration file could not be loaded
    ConfigLoad(String),
}

impl std::error::Error for VantageError {}

impl fmt::Display for VantageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VantageError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            VantageError::ConnectionTimeout {
                host,
                port,
                duration,
            } => {
                write!(
                    f,
                    "Connection timeout: failed to connect to {}:{} after {:?}",
                    host, port, duration
                )
            }
            VantageError::NotConnected => write!(f, "Not connected to Vantage controller"),
            VantageError::ChannelClosed(msg) => write!(f, "Channel closed: {}", msg),
            VantageError::DatabaseParse(msg) => {
                write!(f, "Configuration database parse error: {}", msg)
            }
            VantageError::CacheIo { path, message } => {
                write!(f, "Cache file error for {}: {}", path.display(), message)
            }
            VantageError::ConfigLoad(msg) => write!(f, "Configuration load error: {}", msg),
        }
    }
}

impl From<VantageError> for String {
    fn from(err: VantageError) -> String {
        err.to_string()
    }
}

/// Result type for Vantage operations
pub type VantageResult<T> = Result<T, VantageError>;

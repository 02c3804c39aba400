//! # npbridge Kernel Errors
//!
//! [`Error`] aggregates the typed errors of each subsystem so a host can use a
//! single `Result` type at its outer layer.
use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::host::HostServiceError;
use crate::plugin_system::error::PluginSystemError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error reported by a host service
    #[error("Host service error: {0}")]
    HostService(#[from] HostServiceError),

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

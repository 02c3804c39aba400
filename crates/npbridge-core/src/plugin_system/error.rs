//! # npbridge Plugin System Errors
//!
//! [`PluginSystemError`] covers loading a legacy module, negotiating its
//! tables, the factory contract and calls into a running session.
//! [`StreamError`] covers individual transfers.
//!
//! Both map onto the legacy status vocabulary through `to_np_error`, which is
//! what the trampolines hand back to a module.
use std::path::PathBuf;

use crate::abi::types::NPError;
use crate::config::ConfigError;
use crate::host::HostServiceError;
use crate::plugin_system::stream::StreamId;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Failed to load module '{}': {message}", path.display())]
    LoadError { path: PathBuf, message: String },

    #[error("Module '{module}' does not provide required entry point '{symbol}'")]
    MissingEntryPoint { module: String, symbol: String },

    #[error("Module '{module}' failed '{operation}' with status {status}")]
    InitError {
        module: String,
        operation: String,
        status: NPError,
    },

    #[error("Interface '{requested}' is not supported by this factory")]
    UnsupportedCapability { requested: String },

    #[error("Variable {variable} is not supported")]
    UnsupportedVariable { variable: i32 },

    #[error("Factory is locked; instance creation refused")]
    FactoryLocked,

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Module '{module}' returned status {status} from '{operation}'")]
    ModuleCall {
        module: String,
        operation: String,
        status: NPError,
    },

    #[error("Operation '{operation}' is not valid in state {state}")]
    InvalidState { operation: String, state: String },

    #[error("Module '{module}' panicked during '{operation}': {message}")]
    FfiPanic {
        module: String,
        operation: String,
        message: String,
    },

    #[error("Host service error: {0}")]
    Host(#[from] HostServiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PluginSystemError {
    /// Legacy status a module sees when this error is raised on its behalf.
    pub fn to_np_error(&self) -> NPError {
        match self {
            PluginSystemError::LoadError { .. } => NPError::MODULE_LOAD_FAILED_ERROR,
            PluginSystemError::MissingEntryPoint { .. } => NPError::INVALID_FUNCTABLE_ERROR,
            PluginSystemError::InitError { status, .. } => *status,
            PluginSystemError::ModuleCall { status, .. } => *status,
            PluginSystemError::UnsupportedVariable { .. } => NPError::GENERIC_ERROR,
            PluginSystemError::Stream(e) => e.to_np_error(),
            PluginSystemError::Host(e) => e.to_np_error(),
            PluginSystemError::InvalidState { .. } => NPError::INVALID_INSTANCE_ERROR,
            PluginSystemError::UnsupportedCapability { .. }
            | PluginSystemError::FactoryLocked
            | PluginSystemError::FfiPanic { .. }
            | PluginSystemError::Config(_) => NPError::GENERIC_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Unknown or already destroyed stream {0}")]
    UnknownStream(StreamId),

    #[error("Stream {0} is not seekable")]
    NotSeekable(StreamId),

    #[error("Stream {id} cannot be used for '{operation}' in this direction")]
    WrongDirection { id: StreamId, operation: &'static str },

    #[error("Module refused the stream with status {0}")]
    Rejected(NPError),

    #[error("Module does not implement '{0}'")]
    MissingSlot(&'static str),

    #[error("Host sink failed: {0}")]
    Sink(String),

    #[error("Stream pointer does not belong to this session")]
    ForeignStream,

    #[error("Session is not running")]
    SessionInactive,

    #[error("Failed to spool stream to a file: {0}")]
    Spool(#[from] std::io::Error),
}

impl StreamError {
    pub fn to_np_error(&self) -> NPError {
        match self {
            StreamError::UnknownStream(_) | StreamError::WrongDirection { .. } => NPError::INVALID_PARAM,
            StreamError::NotSeekable(_) => NPError::STREAM_NOT_SEEKABLE,
            StreamError::Rejected(status) => *status,
            StreamError::MissingSlot(_) => NPError::INVALID_FUNCTABLE_ERROR,
            StreamError::ForeignStream => NPError::INVALID_PARAM,
            StreamError::SessionInactive => NPError::INVALID_INSTANCE_ERROR,
            StreamError::Sink(_) | StreamError::Spool(_) => NPError::GENERIC_ERROR,
        }
    }
}

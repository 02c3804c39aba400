use thiserror::Error;

use crate::abi::types::NPError;

/// Failure reported by a host service to the core.
///
/// These never reach a module directly; the trampolines translate them with
/// [`HostServiceError::to_np_error`].
#[derive(Debug, Error)]
pub enum HostServiceError {
    #[error("Operation '{0}' is not supported by this host")]
    NotSupported(&'static str),

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Request refused: {0}")]
    Refused(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostServiceError {
    /// Legacy status a module sees for this failure.
    pub fn to_np_error(&self) -> NPError {
        match self {
            HostServiceError::InvalidUrl(_) => NPError::INVALID_URL,
            HostServiceError::FileNotFound(_) => NPError::FILE_NOT_FOUND,
            HostServiceError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => NPError::FILE_NOT_FOUND,
            HostServiceError::NotSupported(_) | HostServiceError::Refused(_) | HostServiceError::Io(_) => {
                NPError::GENERIC_ERROR
            }
        }
    }
}

#![cfg(test)]

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::host::HostServiceError;
use crate::kernel::error::{Error, Result};
use crate::plugin_system::PluginSystemError;

fn load(path: &str) -> Result<()> {
    let opened: std::result::Result<(), PluginSystemError> = Err(PluginSystemError::LoadError {
        path: PathBuf::from(path),
        message: "not a library".to_string(),
    });
    opened?;
    Ok(())
}

#[test]
fn test_subsystem_errors_convert() {
    let err = load("/nowhere/module.so").unwrap_err();
    assert!(matches!(err, Error::PluginSystem(PluginSystemError::LoadError { .. })));
    assert!(err.to_string().starts_with("Plugin system error:"));

    let err: Error = ConfigError::UnsupportedFormat(PathBuf::from("bridge.ini")).into();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("bridge.ini"));

    let err: Error = HostServiceError::InvalidUrl("gopher://x".to_string()).into();
    assert!(matches!(err, Error::HostService(HostServiceError::InvalidUrl(_))));
}

#[test]
fn test_messages_become_other() {
    let err: Error = "no MIME types".into();
    assert!(matches!(err, Error::Other(ref m) if m == "no MIME types"));
    assert_eq!(err.to_string(), "Error: no MIME types");

    let err: Error = format!("stopped after {} requests", 3).into();
    assert_eq!(err.to_string(), "Error: stopped after 3 requests");
}

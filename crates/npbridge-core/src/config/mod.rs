//! # npbridge Configuration
//!
//! Host-side knobs for the adapter: the user agent reported to modules, which
//! module table versions are accepted, how host-delivered streams are chunked,
//! and the answers given to a module's host-variable queries.
//!
//! A [`BridgeConfig`] is usually built with [`Default`] or read from a file
//! with [`BridgeConfig::load`]; the file format follows the extension (see
//! [`ConfigFormat`]). Missing keys take their default values.
pub mod error;

use std::path::Path;

use semver::VersionReq;
use serde::{Deserialize, Serialize};

pub use error::ConfigError;

/// File formats a [`BridgeConfig`] can be read from, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    #[cfg(feature = "yaml-config")]
    Yaml,
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Every format compiled into this build.
    pub const ENABLED: &'static [ConfigFormat] = &[
        ConfigFormat::Json,
        #[cfg(feature = "yaml-config")]
        ConfigFormat::Yaml,
        #[cfg(feature = "toml-config")]
        ConfigFormat::Toml,
    ];

    /// Extensions recognized for the format; the first is canonical.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ConfigFormat::Json => &["json"],
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => &["yaml", "yml"],
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => &["toml"],
        }
    }

    pub fn extension(self) -> &'static str {
        self.extensions()[0]
    }

    /// Format of a configuration file, ignoring the extension's case.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ENABLED
            .iter()
            .copied()
            .find(|format| format.extensions().contains(&ext.as_str()))
    }
}

/// Default user agent string reported through `NPN_UserAgent`.
pub const DEFAULT_USER_AGENT: &str = concat!("npbridge/", env!("CARGO_PKG_VERSION"));

/// Adapter configuration shared by every loaded module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Returned to modules by `NPN_UserAgent`.
    pub user_agent: String,
    /// Semver requirement the module table version (`major.minor.0`) must meet.
    pub accepted_module_versions: String,
    /// Largest buffer handed to a module in one `NPP_Write` call.
    pub max_write_chunk: u32,
    /// Consecutive zero answers from `NPP_WriteReady` before a delivery is aborted.
    pub write_ready_retries: u32,
    /// Answer to `NPNVjavascriptEnabledBool`.
    pub javascript_enabled: bool,
    /// Answer to `NPNVisOfflineBool`.
    pub offline: bool,
    /// Expose the embedded runtime bridge to modules, when one is installed.
    pub runtime_bridge: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accepted_module_versions: "^0".to_string(),
            max_write_chunk: 8192,
            write_ready_retries: 8,
            javascript_enabled: false,
            offline: false,
            runtime_bridge: false,
        }
    }
}

impl BridgeConfig {
    /// Read and validate a configuration file. The format follows the extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::deserialize(&content, format)?;
        config.validate()?;
        log::debug!("Loaded bridge configuration from {}", path.display());
        Ok(config)
    }

    /// Deserialize from string based on format
    pub fn deserialize(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let parse_err = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::Parse {
            format: format.extension().to_string(),
            source,
        };
        match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| parse_err(Box::new(e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| parse_err(Box::new(e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| parse_err(Box::new(e))),
        }
    }

    /// Serialize to string based on format
    pub fn serialize(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        let ser_err = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::Serialize {
            format: format.extension().to_string(),
            source,
        };
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| ser_err(Box::new(e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| ser_err(Box::new(e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| ser_err(Box::new(e))),
        }
    }

    /// Check values that serde cannot: the version requirement and chunk size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.module_version_requirement()?;
        if self.max_write_chunk == 0 || self.max_write_chunk > i32::MAX as u32 {
            return Err(ConfigError::InvalidValue {
                key: "max_write_chunk".to_string(),
                message: format!("must be between 1 and {}", i32::MAX),
            });
        }
        if self.user_agent.contains('\0') {
            return Err(ConfigError::InvalidValue {
                key: "user_agent".to_string(),
                message: "must not contain NUL bytes".to_string(),
            });
        }
        Ok(())
    }

    /// Parsed form of `accepted_module_versions`.
    pub fn module_version_requirement(&self) -> Result<VersionReq, ConfigError> {
        VersionReq::parse(&self.accepted_module_versions).map_err(|e| ConfigError::InvalidValue {
            key: "accepted_module_versions".to_string(),
            message: e.to_string(),
        })
    }
}

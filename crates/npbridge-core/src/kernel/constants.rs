/// Application name
pub const APP_NAME: &str = "npbridge";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming a configuration file for the CLI host
pub const CONFIG_ENV_VAR: &str = "NPBRIDGE_CONFIG";

/// Default configuration file name looked up next to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "npbridge.toml";

/// URL scheme served by the bundled CLI host
pub const FILE_URL_SCHEME: &str = "file:";

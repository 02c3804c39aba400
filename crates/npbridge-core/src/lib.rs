pub mod abi;
pub mod callbacks;
pub mod config;
pub mod host;
pub mod kernel;
pub mod plugin_system;
pub mod utils;

// Re-export the types a host needs to load a module and drive sessions.
pub use abi::{NPError, NPReason};
pub use callbacks::{CallbackTable, SharedServices};
pub use config::BridgeConfig;
pub use host::{BrowserServices, HostServiceError, MemoryAllocator, PluginManagerService, RuntimeBridge};
pub use kernel::error::Error as KernelError;
pub use plugin_system::{
    InstanceConfig, InterfaceId, LegacyPlugin, Plugin, PluginFactory, PluginSystemError, SessionInstance,
};

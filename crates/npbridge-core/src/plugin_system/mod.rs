//! # npbridge Plugin System
//!
//! Presents a legacy module as a host plugin.
//!
//! ## Key Submodules
//!
//! - **[`loader`]**: maps a module and resolves its exported entry points.
//! - **[`adapter`]**: [`LegacyPlugin`], which drives module initialization,
//!   negotiates the module table and acts as the session factory.
//! - **[`instance`]**: [`SessionInstance`], one embedding of the module's
//!   content, and the per-session state the trampolines reach via `NPP`.
//! - **[`stream`]**: host-delivered and module-created streams.
//! - **[`notify`]**: URL requests and their pending notifications.
//! - **[`state`]**: the adapter lifecycle.
//! - **[`traits`]**: the [`Plugin`] and [`PluginFactory`] contracts.
//! - **[`error`]**: [`PluginSystemError`] and [`StreamError`].
//!
//! All calls into a module happen on one thread. The adapter, its sessions and
//! the module library are kept alive by shared ownership; the library is
//! released (after `NP_Shutdown`) once the adapter and every session are gone.
pub mod adapter;
pub mod error;
pub mod instance;
pub mod loader;
pub mod notify;
pub mod state;
pub mod stream;
pub mod traits;

pub use adapter::LegacyPlugin;
pub use error::{PluginSystemError, StreamError};
pub use instance::{InstanceConfig, InstanceMode, SavedData, SessionId, SessionInstance, WindowGeometry};
pub use loader::{EntryPoints, ModuleLibrary};
pub use notify::{NotifyToken, PostData, UrlRequest, UrlResponder};
pub use state::AdapterState;
pub use stream::{
    ByteRange, DeliveryOutcome, IncomingStream, StreamDelivery, StreamDirection, StreamId, StreamInfo, StreamSink,
};
pub use traits::{InterfaceId, Plugin, PluginFactory, PluginValue, PluginVariable};

#[cfg(test)]
pub(crate) mod tests;

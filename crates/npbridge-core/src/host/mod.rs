//! # Host Services
//!
//! The narrow interfaces through which the core reaches the surrounding host.
//! The core never implements these itself (apart from [`SystemAllocator`] and
//! the refusing [`NullPluginManager`]); a host supplies them once in a
//! [`BrowserServices`] bundle and they are shared by every loaded module for
//! the rest of the process.
//!
//! - [`PluginManagerService`]: URL fetch and post, module-created streams,
//!   partial reads, status and repaint notifications, platform handles.
//! - [`MemoryAllocator`]: the `NPN_MemAlloc` family.
//! - [`RuntimeBridge`]: the optional embedded runtime (Java) handles.
//!
//! All service calls happen on the module's call thread. Methods with a
//! default body are optional for a host.
pub mod allocator;
pub mod error;

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use crate::abi::types::{JRIEnv, JavaClass, Jref, NPNVariable, NPRect};
use crate::config::BridgeConfig;
use crate::plugin_system::notify::{PostData, UrlRequest};
use crate::plugin_system::stream::{ByteRange, StreamInfo, StreamSink};
use crate::plugin_system::instance::SessionId;
use crate::utils::SendPtr;

pub use allocator::SystemAllocator;
pub use error::HostServiceError;

/// Opaque platform region passed through from `NPN_InvalidateRegion`.
pub type RegionHandle = SendPtr<c_void>;

/// Host-side handling of everything a module asks of the browser.
pub trait PluginManagerService: Send + Sync {
    /// Start fetching `request.url()`. Returning `Ok` means the request was
    /// accepted; the outcome is reported later through the request's responder.
    fn get_url(&self, request: UrlRequest) -> Result<(), HostServiceError> {
        drop(request);
        Err(HostServiceError::NotSupported("get_url"))
    }

    /// Start posting `data` to `request.url()`.
    fn post_url(&self, request: UrlRequest, data: PostData) -> Result<(), HostServiceError> {
        drop((request, data));
        Err(HostServiceError::NotSupported("post_url"))
    }

    /// Open a destination for a module-created stream.
    fn new_stream(
        &self,
        session: SessionId,
        mime_type: &str,
        target: &str,
    ) -> Result<Box<dyn StreamSink>, HostServiceError> {
        let _ = (session, mime_type, target);
        Err(HostServiceError::NotSupported("new_stream"))
    }

    /// Re-read ranges of a host-delivered stream whose data the core does not hold.
    fn request_read(&self, stream: &StreamInfo, ranges: &[ByteRange]) -> Result<(), HostServiceError> {
        let _ = (stream, ranges);
        Err(HostServiceError::NotSupported("request_read"))
    }

    fn status(&self, _session: SessionId, _message: &str) {}

    fn invalidate_rect(&self, _session: SessionId, _rect: NPRect) {}

    fn invalidate_region(&self, _session: SessionId, _region: RegionHandle) {}

    fn force_redraw(&self, _session: SessionId) {}

    fn reload_plugins(&self, _reload_pages: bool) {}

    /// Platform handle for `NPNVxDisplay`, `NPNVxtAppContext` or
    /// `NPNVnetscapeWindow`. `None` when the host has no such handle.
    fn platform_handle(&self, _session: SessionId, _variable: NPNVariable) -> Option<SendPtr<c_void>> {
        None
    }
}

/// Allocator behind `NPN_MemAlloc`, `NPN_MemFree` and `NPN_MemFlush`.
pub trait MemoryAllocator: Send + Sync {
    /// Null on failure.
    fn alloc(&self, size: u32) -> *mut c_void;

    /// # Safety
    /// `ptr` must be null or a block returned by [`MemoryAllocator::alloc`] on
    /// this allocator that has not been freed yet.
    unsafe fn free(&self, ptr: *mut c_void);

    /// Try to release up to `size` bytes; returns the number actually freed.
    fn flush(&self, _size: u32) -> u32 {
        0
    }
}

/// Embedded runtime handles. Absent on most hosts.
pub trait RuntimeBridge: Send + Sync {
    fn env(&self) -> *mut JRIEnv;
    fn peer(&self, session: SessionId) -> Jref;
    fn class(&self, handle: *mut c_void) -> *mut JavaClass;
}

/// Plugin manager that refuses every request. Useful for inspecting a module
/// without serving it content.
#[derive(Debug, Default)]
pub struct NullPluginManager;

impl PluginManagerService for NullPluginManager {}

/// The services a host hands to [`LegacyPlugin::create_plugin`](crate::plugin_system::adapter::LegacyPlugin::create_plugin).
///
/// Only the first bundle seen by the process is kept; see
/// [`SharedServices`](crate::callbacks::SharedServices).
#[derive(Clone)]
pub struct BrowserServices {
    pub plugin_manager: Arc<dyn PluginManagerService>,
    pub allocator: Arc<dyn MemoryAllocator>,
    pub runtime: Option<Arc<dyn RuntimeBridge>>,
    pub config: BridgeConfig,
}

impl BrowserServices {
    /// Bundle with the system allocator, no runtime bridge and default config.
    pub fn new(plugin_manager: Arc<dyn PluginManagerService>) -> Self {
        Self {
            plugin_manager,
            allocator: Arc::new(SystemAllocator::new()),
            runtime: None,
            config: BridgeConfig::default(),
        }
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn MemoryAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeBridge>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for BrowserServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserServices")
            .field("runtime", &self.runtime.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use semver::VersionReq;

use crate::config::{BridgeConfig, ConfigError};
use crate::host::{BrowserServices, MemoryAllocator, PluginManagerService, RuntimeBridge};
use crate::utils::ffi::lossy_cstring;

static SERVICES: OnceLock<SharedServices> = OnceLock::new();

/// Host services shared by every module in the process.
///
/// The host table has no per-module context, so the trampolines reach the
/// host through this process-wide record. It is filled from the first
/// [`BrowserServices`] bundle and never replaced.
pub struct SharedServices {
    plugin_manager: Arc<dyn PluginManagerService>,
    allocator: Arc<dyn MemoryAllocator>,
    runtime: Option<Arc<dyn RuntimeBridge>>,
    config: BridgeConfig,
    user_agent: CString,
    module_versions: VersionReq,
}

impl SharedServices {
    /// Validate `services` and build the record the trampolines read.
    pub(crate) fn from_bundle(services: &BrowserServices) -> Result<Self, ConfigError> {
        services.config.validate()?;
        let module_versions = services.config.module_version_requirement()?;
        Ok(SharedServices {
            plugin_manager: services.plugin_manager.clone(),
            allocator: services.allocator.clone(),
            runtime: services.runtime.clone(),
            user_agent: lossy_cstring(&services.config.user_agent),
            config: services.config.clone(),
            module_versions,
        })
    }

    /// Install `services` unless a bundle is already installed, and return
    /// whichever bundle is in effect.
    pub fn install(services: &BrowserServices) -> Result<&'static SharedServices, ConfigError> {
        if let Some(existing) = SERVICES.get() {
            log::debug!("Host services already installed; keeping the first bundle");
            return Ok(existing);
        }
        let built = Self::from_bundle(services)?;

        let mut installed = false;
        let shared = SERVICES.get_or_init(|| {
            installed = true;
            built
        });
        if installed {
            log::debug!("Installed host services (user agent '{}')", services.config.user_agent);
        }
        Ok(shared)
    }

    pub fn get() -> Option<&'static SharedServices> {
        SERVICES.get()
    }

    pub fn plugin_manager(&self) -> &dyn PluginManagerService {
        self.plugin_manager.as_ref()
    }

    pub fn allocator(&self) -> &dyn MemoryAllocator {
        self.allocator.as_ref()
    }

    /// The runtime bridge, if one was installed and the config exposes it.
    pub fn runtime(&self) -> Option<&dyn RuntimeBridge> {
        if self.config.runtime_bridge {
            self.runtime.as_deref()
        } else {
            None
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Cached for the life of the process; modules may keep the pointer.
    pub fn user_agent(&self) -> &CStr {
        &self.user_agent
    }

    pub fn module_versions(&self) -> &VersionReq {
        &self.module_versions
    }
}

impl fmt::Debug for SharedServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedServices")
            .field("user_agent", &self.user_agent)
            .field("module_versions", &self.module_versions)
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration in effect: the installed one, or the defaults before any
/// module has been created.
pub fn active_config() -> &'static BridgeConfig {
    static DEFAULT: LazyLock<BridgeConfig> = LazyLock::new(BridgeConfig::default);
    SharedServices::get().map_or(&*DEFAULT, SharedServices::config)
}

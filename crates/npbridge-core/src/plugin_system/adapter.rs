//! [`LegacyPlugin`]: one legacy module presented as a host plugin and
//! session factory.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::abi::tables::NPPluginFuncs;
use crate::abi::types::{NPError, NPPVariable};
use crate::abi::version::TableVersion;
use crate::callbacks::{CallbackTable, SharedServices};
use crate::host::BrowserServices;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::instance::SessionInstance;
use crate::plugin_system::loader::{call_entry, clamp_to_reported_size, ModuleCore, ModuleLibrary};
use crate::plugin_system::state::AdapterState;
use crate::plugin_system::traits::{InterfaceId, Plugin, PluginFactory, PluginValue, PluginVariable};
use crate::utils::ffi::string_from_ptr;

/// A loaded, initialized legacy module.
pub struct LegacyPlugin {
    core: Arc<ModuleCore>,
    locked: AtomicBool,
}

impl LegacyPlugin {
    /// Load the module at `path` and bring it up with [`LegacyPlugin::create_plugin`].
    pub fn load(path: impl AsRef<Path>, services: &BrowserServices) -> Result<Self, PluginSystemError> {
        let library = ModuleLibrary::open(path)?;
        Self::create_plugin(library, services)
    }

    /// Bring a mapped module up.
    ///
    /// In order: resolve the entry points, make sure the host table exists
    /// and the services are installed, call `NP_Initialize` with the table,
    /// cache the shutdown entry point, negotiate the module table with
    /// `NP_GetEntryPoints` and check its version. A failure after
    /// `NP_Initialize` succeeded still runs `NP_Shutdown` before the library
    /// is released; a failure before it does not.
    pub fn create_plugin(library: ModuleLibrary, services: &BrowserServices) -> Result<Self, PluginSystemError> {
        let name = library.name().to_string();
        log::debug!("Module '{}': {} -> {}", name, AdapterState::Unloaded, AdapterState::Loaded);

        let entries = library.resolve()?;
        log::debug!("Module '{}': {} -> {}", name, AdapterState::Loaded, AdapterState::EntryPointsResolved);

        let table = CallbackTable::get_or_init();
        let shared = SharedServices::install(services)?;

        let status = call_entry(&name, "NP_Initialize", || unsafe { (entries.initialize)(table.as_ptr()) })?;
        if !status.is_ok() {
            return Err(PluginSystemError::InitError {
                module: name,
                operation: "NP_Initialize".to_string(),
                status,
            });
        }

        // From here on dropping `core` runs NP_Shutdown.
        let mut core = ModuleCore::initialized(library, entries);

        let mut funcs = NPPluginFuncs::empty();
        let status = call_entry(&name, "NP_GetEntryPoints", || unsafe {
            (entries.get_entry_points)(&mut funcs)
        })?;
        if !status.is_ok() {
            return Err(PluginSystemError::InitError {
                module: name,
                operation: "NP_GetEntryPoints".to_string(),
                status,
            });
        }

        let version = TableVersion::from_packed(funcs.version);
        if !version.is_accepted_by(shared.module_versions()) {
            log::warn!(
                "Module '{}' reports table version {}, which does not satisfy '{}'",
                name,
                version,
                shared.module_versions()
            );
            return Err(PluginSystemError::InitError {
                module: name,
                operation: "NP_GetEntryPoints".to_string(),
                status: NPError::INCOMPATIBLE_VERSION_ERROR,
            });
        }
        clamp_to_reported_size(&mut funcs);
        core.install_funcs(funcs);
        core.transition(AdapterState::Initialized);

        log::info!("Loaded module '{}' (table version {})", name, version);
        Ok(Self {
            core: Arc::new(core),
            locked: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> AdapterState {
        self.core.state()
    }

    /// The negotiated module table.
    pub fn module_table(&self) -> &NPPluginFuncs {
        self.core.funcs()
    }

    pub fn table_version(&self) -> TableVersion {
        TableVersion::from_packed(self.core.funcs().version)
    }

    /// Sessions created by this adapter that have not been dropped yet.
    pub fn outstanding_sessions(&self) -> usize {
        self.core.outstanding_sessions()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> Option<&Path> {
        self.core.library().path()
    }

    fn module_string(&self, variable: NPPVariable, operation: &str) -> Result<String, PluginSystemError> {
        let get_value = self.core.entries().get_value.ok_or_else(|| PluginSystemError::MissingEntryPoint {
            module: self.core.name().to_string(),
            symbol: "NP_GetValue".to_string(),
        })?;
        let mut out: *const std::ffi::c_char = std::ptr::null();
        let status = call_entry(self.core.name(), operation, || unsafe {
            get_value(std::ptr::null_mut(), variable, &mut out as *mut _ as *mut std::ffi::c_void)
        })?;
        if !status.is_ok() {
            return Err(PluginSystemError::ModuleCall {
                module: self.core.name().to_string(),
                operation: operation.to_string(),
                status,
            });
        }
        Ok(unsafe { string_from_ptr(out) }.unwrap_or_default())
    }

    fn ensure_running(&self, operation: &str) -> Result<(), PluginSystemError> {
        let state = self.core.state();
        if state.is_shut_down() {
            return Err(PluginSystemError::InvalidState {
                operation: operation.to_string(),
                state: state.to_string(),
            });
        }
        Ok(())
    }
}

impl Plugin for LegacyPlugin {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn initialize(&self) -> Result<(), PluginSystemError> {
        self.ensure_running("initialize")
    }

    fn shutdown(&self) -> Result<(), PluginSystemError> {
        self.core.run_shutdown().map(|_| ())
    }

    fn mime_description(&self) -> Result<String, PluginSystemError> {
        self.ensure_running("NP_GetMIMEDescription")?;
        let describe = self
            .core
            .entries()
            .get_mime_description
            .ok_or_else(|| PluginSystemError::MissingEntryPoint {
                module: self.core.name().to_string(),
                symbol: "NP_GetMIMEDescription".to_string(),
            })?;
        let description = call_entry(self.core.name(), "NP_GetMIMEDescription", || unsafe { describe() })?;
        Ok(unsafe { string_from_ptr(description) }.unwrap_or_default())
    }

    fn get_value(&self, variable: PluginVariable) -> Result<PluginValue, PluginSystemError> {
        self.ensure_running("NP_GetValue")?;
        if !variable.is_string() {
            return Err(PluginSystemError::UnsupportedVariable {
                variable: variable.to_raw().0,
            });
        }
        self.module_string(variable.to_raw(), "NP_GetValue").map(PluginValue::String)
    }
}

impl PluginFactory for LegacyPlugin {
    type Instance = SessionInstance;

    fn create_instance(&self, iid: &InterfaceId) -> Result<SessionInstance, PluginSystemError> {
        if *iid != InterfaceId::PLUGIN_INSTANCE {
            return Err(PluginSystemError::UnsupportedCapability {
                requested: iid.to_string(),
            });
        }
        if self.is_locked() {
            return Err(PluginSystemError::FactoryLocked);
        }
        let state = self.core.state();
        if !state.accepts_sessions() {
            return Err(PluginSystemError::InvalidState {
                operation: "create_instance".to_string(),
                state: state.to_string(),
            });
        }
        Ok(SessionInstance::new(self.core.clone()))
    }

    fn lock_factory(&self, lock: bool) {
        self.locked.store(lock, Ordering::SeqCst);
        log::debug!("Module '{}': factory {}", self.core.name(), if lock { "locked" } else { "unlocked" });
    }
}

impl std::fmt::Debug for LegacyPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyPlugin")
            .field("name", &self.core.name())
            .field("state", &self.core.state())
            .field("sessions", &self.core.outstanding_sessions())
            .field("locked", &self.is_locked())
            .finish()
    }
}

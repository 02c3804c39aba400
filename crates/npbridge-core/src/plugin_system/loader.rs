//! Opening a module, resolving its exported entry points, and the shared
//! handle ([`ModuleCore`]) that keeps the library mapped while sessions live.
use std::mem::{offset_of, size_of};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use libloading::{Library, Symbol};

use crate::abi::tables::{
    NPPluginFuncs, NpGetEntryPointsFn, NpGetMimeDescriptionFn, NpGetValueFn, NpInitializeFn,
    NpShutdownFn, NP_GET_ENTRY_POINTS_SYMBOL, NP_GET_MIME_DESCRIPTION_SYMBOL, NP_GET_VALUE_SYMBOL,
    NP_INITIALIZE_SYMBOL, NP_SHUTDOWN_SYMBOL,
};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::state::AdapterState;
use crate::utils::{lock, panic_message};

/// The exported functions of a legacy module.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub get_entry_points: NpGetEntryPointsFn,
    pub initialize: NpInitializeFn,
    pub shutdown: NpShutdownFn,
    pub get_mime_description: Option<NpGetMimeDescriptionFn>,
    pub get_value: Option<NpGetValueFn>,
}

/// A module that has been mapped into the process (or linked statically).
pub struct ModuleLibrary {
    name: String,
    path: Option<PathBuf>,
    library: Option<Library>,
    linked: Option<EntryPoints>,
}

impl ModuleLibrary {
    /// Map the shared library at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PluginSystemError> {
        let path = path.as_ref();
        let library = unsafe { Library::new(path) }.map_err(|e| PluginSystemError::LoadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        log::debug!("Mapped module '{}' from {}", name, path.display());
        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            library: Some(library),
            linked: None,
        })
    }

    /// Wrap entry points that are linked into the host binary.
    pub fn from_entry_points(name: impl Into<String>, entries: EntryPoints) -> Self {
        Self {
            name: name.into(),
            path: None,
            library: None,
            linked: Some(entries),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Resolve the required and optional entry points.
    ///
    /// The returned function pointers are only valid while `self` is alive.
    pub fn resolve(&self) -> Result<EntryPoints, PluginSystemError> {
        if let Some(entries) = self.linked {
            return Ok(entries);
        }
        let Some(library) = self.library.as_ref() else {
            return Err(PluginSystemError::LoadError {
                path: self.path.clone().unwrap_or_default(),
                message: "library handle already released".to_string(),
            });
        };

        let entries = unsafe {
            EntryPoints {
                get_entry_points: self.required::<NpGetEntryPointsFn>(library, NP_GET_ENTRY_POINTS_SYMBOL)?,
                initialize: self.required::<NpInitializeFn>(library, NP_INITIALIZE_SYMBOL)?,
                shutdown: self.required::<NpShutdownFn>(library, NP_SHUTDOWN_SYMBOL)?,
                get_mime_description: optional::<NpGetMimeDescriptionFn>(library, NP_GET_MIME_DESCRIPTION_SYMBOL),
                get_value: optional::<NpGetValueFn>(library, NP_GET_VALUE_SYMBOL),
            }
        };
        log::debug!(
            "Resolved entry points of '{}' (mime description: {}, get value: {})",
            self.name,
            entries.get_mime_description.is_some(),
            entries.get_value.is_some()
        );
        Ok(entries)
    }

    unsafe fn required<T: Copy>(&self, library: &Library, symbol: &[u8]) -> Result<T, PluginSystemError> {
        let sym: Symbol<T> = unsafe { library.get(symbol) }.map_err(|_| PluginSystemError::MissingEntryPoint {
            module: self.name.clone(),
            symbol: symbol_name(symbol),
        })?;
        Ok(*sym)
    }
}

unsafe fn optional<T: Copy>(library: &Library, symbol: &[u8]) -> Option<T> {
    unsafe { library.get::<T>(symbol) }.ok().map(|sym| *sym)
}

fn symbol_name(symbol: &[u8]) -> String {
    String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol)).into_owned()
}

impl std::fmt::Debug for ModuleLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLibrary")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("linked", &self.linked.is_some())
            .finish()
    }
}

/// Calls into module code, turning a panic that unwinds out of it into
/// [`PluginSystemError::FfiPanic`].
pub(crate) fn call_entry<R>(
    module: &str,
    operation: &str,
    call: impl FnOnce() -> R,
) -> Result<R, PluginSystemError> {
    panic::catch_unwind(panic::AssertUnwindSafe(call)).map_err(|payload| PluginSystemError::FfiPanic {
        module: module.to_string(),
        operation: operation.to_string(),
        message: panic_message(payload.as_ref()),
    })
}

/// Clears slots that lie beyond the size the module reported. A size of zero
/// is read as "not reported" and leaves the table alone.
pub(crate) fn clamp_to_reported_size(funcs: &mut NPPluginFuncs) {
    let size = funcs.size as usize;
    if size == 0 {
        return;
    }
    let slot = size_of::<usize>();
    macro_rules! clamp {
        ($($field:ident),* $(,)?) => {
            $(
                if offset_of!(NPPluginFuncs, $field) + slot > size {
                    funcs.$field = None;
                }
            )*
        };
    }
    clamp!(
        newp, destroy, setwindow, newstream, destroystream, asfile, writeready, write, print, event,
        urlnotify, getvalue, setvalue,
    );
}

/// Shared state of one initialized module.
///
/// Owned jointly by the adapter and every session it created, so the library
/// outlives all of them. Dropping the last owner runs the cached shutdown
/// entry point (if nobody ran it yet) and then unmaps the library.
pub(crate) struct ModuleCore {
    name: String,
    entries: EntryPoints,
    funcs: NPPluginFuncs,
    shutdown: Mutex<Option<NpShutdownFn>>,
    state: Mutex<AdapterState>,
    sessions: AtomicUsize,
    // Declared last: unmapped after everything above is gone.
    library: ModuleLibrary,
}

// The module table only holds function pointers and an opaque runtime handle.
unsafe impl Send for ModuleCore {}
unsafe impl Sync for ModuleCore {}

impl ModuleCore {
    /// Called once `NP_Initialize` has succeeded; from here on the shutdown
    /// entry point is owed to the module.
    pub(crate) fn initialized(library: ModuleLibrary, entries: EntryPoints) -> Self {
        Self {
            name: library.name().to_string(),
            entries,
            funcs: NPPluginFuncs::empty(),
            shutdown: Mutex::new(Some(entries.shutdown)),
            state: Mutex::new(AdapterState::EntryPointsResolved),
            sessions: AtomicUsize::new(0),
            library,
        }
    }

    pub(crate) fn install_funcs(&mut self, funcs: NPPluginFuncs) {
        self.funcs = funcs;
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn library(&self) -> &ModuleLibrary {
        &self.library
    }

    pub(crate) fn entries(&self) -> &EntryPoints {
        &self.entries
    }

    pub(crate) fn funcs(&self) -> &NPPluginFuncs {
        &self.funcs
    }

    pub(crate) fn state(&self) -> AdapterState {
        *lock(&self.state)
    }

    /// Apply `next` if it is a legal step from the current state.
    pub(crate) fn transition(&self, next: AdapterState) -> bool {
        let mut state = lock(&self.state);
        if state.can_transition_to(next) {
            log::debug!("Module '{}': {} -> {}", self.name, *state, next);
            *state = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn session_opened(&self) {
        if self.sessions.fetch_add(1, Ordering::SeqCst) == 0 {
            self.transition(AdapterState::Active);
        }
    }

    pub(crate) fn session_closed(&self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn outstanding_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Run the cached shutdown entry point. Returns `Ok(false)` when it has
    /// already been run.
    pub(crate) fn run_shutdown(&self) -> Result<bool, PluginSystemError> {
        let Some(shutdown) = lock(&self.shutdown).take() else {
            return Ok(false);
        };
        self.transition(AdapterState::ShuttingDown);
        let outstanding = self.outstanding_sessions();
        if outstanding > 0 {
            log::warn!(
                "Shutting down module '{}' with {} session(s) still open",
                self.name,
                outstanding
            );
        }
        let result = call_entry(&self.name, "NP_Shutdown", || unsafe { shutdown() });
        self.transition(AdapterState::Destroyed);
        let status = result?;
        if status.is_ok() {
            log::info!("Module '{}' shut down", self.name);
            Ok(true)
        } else {
            Err(PluginSystemError::ModuleCall {
                module: self.name.clone(),
                operation: "NP_Shutdown".to_string(),
                status,
            })
        }
    }
}

impl Drop for ModuleCore {
    fn drop(&mut self) {
        if let Err(e) = self.run_shutdown() {
            log::error!("{}", e);
        }
        log::debug!("Releasing module '{}'", self.name);
    }
}

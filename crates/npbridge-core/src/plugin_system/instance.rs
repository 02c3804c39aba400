//! # Sessions
//!
//! A [`SessionInstance`] is one embedding of a module's content (one `NPP`).
//! Its host-side state lives in an [`InstancePeer`] that the module can reach
//! through `NPP::ndata`; trampolines use that to find the session a callback
//! belongs to.
//!
//! Module calls are never made while one of the peer's locks is held, so a
//! module may call back into the host from any `NPP_*` function.
use std::cell::UnsafeCell;
use std::ffi::{c_char, c_void, CString};
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::abi::tables::NPPluginFuncs;
use crate::abi::types::{
    NPBool, NPError, NPNVariable, NPPrint, NPReason, NPRect, NPSavedData, NPStream, NPWindow, NPP, NPP_t,
    NP_ASFILE, NP_ASFILEONLY, NP_EMBED, NP_FULL, NP_NORMAL, NP_SEEK,
};
use crate::callbacks::{active_config, SharedServices};
use crate::plugin_system::error::{PluginSystemError, StreamError};
use crate::plugin_system::loader::ModuleCore;
use crate::plugin_system::notify::{PendingNotifications, PendingNotify};
use crate::plugin_system::stream::{
    ByteRange, DeliveryOutcome, IncomingStream, ReadPlan, StreamDelivery, StreamDirection, StreamHandle,
    StreamId, StreamInfo, StreamRegistry, StreamSpec,
};
use crate::plugin_system::traits::{PluginValue, PluginVariable};
use crate::utils::ffi::{lossy_cstring, string_from_ptr};
use crate::utils::{lock, SendPtr};

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the content is embedded in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceMode {
    #[default]
    Embed,
    Full,
}

impl InstanceMode {
    pub fn to_raw(self) -> u16 {
        match self {
            InstanceMode::Embed => NP_EMBED,
            InstanceMode::Full => NP_FULL,
        }
    }
}

/// State a module returned from `NPP_Destroy`, copied out of module memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedData(pub Vec<u8>);

/// Everything `NPP_New` needs.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    pub mime_type: String,
    pub mode: InstanceMode,
    /// Element attributes, passed to the module as `argn`/`argv`.
    pub attributes: Vec<(String, String)>,
    /// Handed over to the module, which owns it afterwards.
    pub saved: Option<SavedData>,
}

impl InstanceConfig {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: InstanceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_saved(mut self, saved: SavedData) -> Self {
        self.saved = Some(saved);
        self
    }
}

/// Window geometry passed to `NPP_SetWindow`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowGeometry {
    pub handle: SendPtr<c_void>,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub clip: NPRect,
}

/// C strings handed to `NPP_New`, kept alive for the life of the session.
struct InstanceArguments {
    mime: CString,
    _names: Vec<CString>,
    _values: Vec<CString>,
    argn: Vec<*mut c_char>,
    argv: Vec<*mut c_char>,
}

impl InstanceArguments {
    fn build(config: &InstanceConfig) -> Self {
        let limit = i16::MAX as usize;
        if config.attributes.len() > limit {
            log::warn!("Only the first {} of {} attributes are passed on", limit, config.attributes.len());
        }
        let (names, values): (Vec<_>, Vec<_>) = config
            .attributes
            .iter()
            .take(limit)
            .map(|(name, value)| (lossy_cstring(name), lossy_cstring(value)))
            .unzip();
        let argn = names.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        let argv = values.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        Self {
            mime: lossy_cstring(&config.mime_type),
            _names: names,
            _values: values,
            argn,
            argv,
        }
    }
}

enum Pump {
    Completed,
    Aborted(NPReason),
    /// The module destroyed the stream itself.
    Gone,
}

/// Host-side state of one session, reachable from `NPP::ndata`.
pub struct InstancePeer {
    id: SessionId,
    npp: UnsafeCell<NPP_t>,
    module: Arc<ModuleCore>,
    pub(crate) streams: Mutex<StreamRegistry>,
    pub(crate) notifications: Mutex<PendingNotifications>,
    window: Mutex<Option<Box<NPWindow>>>,
    _arguments: Mutex<Option<InstanceArguments>>,
    started: AtomicBool,
    destroying: AtomicBool,
    destroyed: AtomicBool,
    windowless: AtomicBool,
    transparent: AtomicBool,
}

// The raw pointers inside are only dereferenced on the module's call thread.
unsafe impl Send for InstancePeer {}
unsafe impl Sync for InstancePeer {}

impl InstancePeer {
    fn create(module: Arc<ModuleCore>) -> Arc<Self> {
        let id = SessionId::next();
        Arc::new_cyclic(|weak| {
            let owner = weak.as_ptr();
            Self {
                id,
                npp: UnsafeCell::new(NPP_t {
                    pdata: std::ptr::null_mut(),
                    ndata: owner as *mut c_void,
                }),
                module,
                streams: Mutex::new(StreamRegistry::new(owner, id)),
                notifications: Mutex::new(PendingNotifications::default()),
                window: Mutex::new(None),
                _arguments: Mutex::new(None),
                started: AtomicBool::new(false),
                destroying: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                windowless: AtomicBool::new(false),
                transparent: AtomicBool::new(false),
            }
        })
    }

    /// Recovers the peer behind a module-supplied instance handle. `None` for
    /// null handles and destroyed sessions.
    ///
    /// # Safety
    /// `npp` must be null or a handle created by this host that is still alive.
    pub(crate) unsafe fn from_npp(npp: NPP) -> Option<Arc<InstancePeer>> {
        if npp.is_null() {
            return None;
        }
        unsafe { Self::from_owner((*npp).ndata as *const InstancePeer) }
    }

    /// # Safety
    /// `owner` must be null or point to a peer that is still owned by an `Arc`.
    pub(crate) unsafe fn from_owner(owner: *const InstancePeer) -> Option<Arc<InstancePeer>> {
        if owner.is_null() {
            return None;
        }
        let peer = unsafe {
            Arc::increment_strong_count(owner);
            Arc::from_raw(owner)
        };
        (!peer.is_destroyed()).then_some(peer)
    }

    pub fn session_id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn npp(&self) -> NPP {
        self.npp.get()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_windowless(&self) -> bool {
        self.windowless.load(Ordering::SeqCst)
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent.load(Ordering::SeqCst)
    }

    pub(crate) fn set_windowless(&self, windowless: bool) {
        self.windowless.store(windowless, Ordering::SeqCst);
    }

    pub(crate) fn set_transparent(&self, transparent: bool) {
        self.transparent.store(transparent, Ordering::SeqCst);
    }

    fn funcs(&self) -> NPPluginFuncs {
        *self.module.funcs()
    }

    fn module_alive(&self) -> bool {
        !self.module.state().is_shut_down()
    }

    fn ensure_callable(&self, operation: &str) -> Result<(), PluginSystemError> {
        if self.destroying.load(Ordering::SeqCst) {
            return Err(PluginSystemError::InvalidState {
                operation: operation.to_string(),
                state: "destroyed".to_string(),
            });
        }
        let state = self.module.state();
        if state.is_shut_down() {
            return Err(PluginSystemError::InvalidState {
                operation: operation.to_string(),
                state: state.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_started(&self, operation: &str) -> Result<(), PluginSystemError> {
        self.ensure_callable(operation)?;
        if !self.is_started() {
            return Err(PluginSystemError::InvalidState {
                operation: operation.to_string(),
                state: "not started".to_string(),
            });
        }
        Ok(())
    }

    fn slot<F>(&self, slot: Option<F>, name: &str) -> Result<F, PluginSystemError> {
        slot.ok_or_else(|| PluginSystemError::MissingEntryPoint {
            module: self.module.name().to_string(),
            symbol: name.to_string(),
        })
    }

    fn check(&self, operation: &str, status: NPError) -> Result<(), PluginSystemError> {
        if status.is_ok() {
            Ok(())
        } else {
            Err(PluginSystemError::ModuleCall {
                module: self.module.name().to_string(),
                operation: operation.to_string(),
                status,
            })
        }
    }

    fn start(&self, config: InstanceConfig) -> Result<(), PluginSystemError> {
        self.ensure_callable("NPP_New")?;
        if self.is_started() {
            return Err(PluginSystemError::InvalidState {
                operation: "NPP_New".to_string(),
                state: "started".to_string(),
            });
        }
        let newp = self.slot(self.funcs().newp, "NPP_New")?;

        let mut args = InstanceArguments::build(&config);
        let saved = config.saved.as_ref().map_or(std::ptr::null_mut(), alloc_saved);
        let argc = args.argn.len() as i16;
        let status = unsafe {
            newp(
                args.mime.as_ptr() as *mut c_char,
                self.npp(),
                config.mode.to_raw(),
                argc,
                args.argn.as_mut_ptr(),
                args.argv.as_mut_ptr(),
                saved,
            )
        };
        *lock(&self._arguments) = Some(args);
        self.check("NPP_New", status)?;

        self.started.store(true, Ordering::SeqCst);
        log::info!(
            "Session {} started for '{}' in module '{}'",
            self.id,
            config.mime_type,
            self.module.name()
        );
        Ok(())
    }

    fn set_window(&self, geometry: &WindowGeometry) -> Result<(), PluginSystemError> {
        self.ensure_started("NPP_SetWindow")?;
        let setwindow = self.slot(self.funcs().setwindow, "NPP_SetWindow")?;
        let window = {
            let mut slot = lock(&self.window);
            let window = slot.get_or_insert_with(|| {
                Box::new(NPWindow {
                    window: std::ptr::null_mut(),
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 0,
                    clip_rect: NPRect::default(),
                    #[cfg(unix)]
                    ws_info: std::ptr::null_mut(),
                })
            });
            window.window = geometry.handle.0;
            window.x = geometry.x;
            window.y = geometry.y;
            window.width = geometry.width;
            window.height = geometry.height;
            window.clip_rect = geometry.clip;
            &mut **window as *mut NPWindow
        };
        let status = unsafe { setwindow(self.npp(), window) };
        self.check("NPP_SetWindow", status)
    }

    fn handle_event(&self, event: *mut c_void) -> Result<bool, PluginSystemError> {
        self.ensure_started("NPP_HandleEvent")?;
        let handler = self.slot(self.funcs().event, "NPP_HandleEvent")?;
        Ok(unsafe { handler(self.npp(), event) } != 0)
    }

    fn print(&self, platform_print: *mut NPPrint) -> Result<(), PluginSystemError> {
        self.ensure_started("NPP_Print")?;
        let print = self.slot(self.funcs().print, "NPP_Print")?;
        unsafe { print(self.npp(), platform_print) };
        Ok(())
    }

    fn get_value(&self, variable: PluginVariable) -> Result<PluginValue, PluginSystemError> {
        self.ensure_started("NPP_GetValue")?;
        let getvalue = self.slot(self.funcs().getvalue, "NPP_GetValue")?;
        if variable.is_string() {
            let mut out: *const c_char = std::ptr::null();
            let status = unsafe { getvalue(self.npp(), variable.to_raw(), &mut out as *mut _ as *mut c_void) };
            self.check("NPP_GetValue", status)?;
            Ok(PluginValue::String(unsafe { string_from_ptr(out) }.unwrap_or_default()))
        } else {
            // Wide enough for modules that answer with an int instead of a byte.
            let mut out: u32 = 0;
            let status = unsafe { getvalue(self.npp(), variable.to_raw(), &mut out as *mut _ as *mut c_void) };
            self.check("NPP_GetValue", status)?;
            Ok(PluginValue::Bool(out != 0))
        }
    }

    fn set_value(&self, variable: NPNVariable, value: *mut c_void) -> Result<(), PluginSystemError> {
        self.ensure_started("NPP_SetValue")?;
        let setvalue = self.slot(self.funcs().setvalue, "NPP_SetValue")?;
        let status = unsafe { setvalue(self.npp(), variable, value) };
        self.check("NPP_SetValue", status)
    }

    fn stream_open(&self, id: StreamId) -> bool {
        lock(&self.streams).contains(id)
    }

    fn ensure_streaming(&self) -> Result<(), StreamError> {
        if !self.is_started() || self.destroying.load(Ordering::SeqCst) || !self.module_alive() {
            return Err(StreamError::SessionInactive);
        }
        Ok(())
    }

    /// Announce a host-delivered stream with `NPP_NewStream`; returns the
    /// transfer mode the module chose.
    fn open_to_module(&self, spec: StreamSpec) -> Result<(StreamHandle, u16), StreamError> {
        self.ensure_streaming()?;
        let newstream = self.funcs().newstream.ok_or(StreamError::MissingSlot("NPP_NewStream"))?;
        let mime = lossy_cstring(&spec.mime_type);
        let url = spec.url.clone();
        let seekable = spec.seekable;

        let handle = lock(&self.streams).open(spec);
        let mut stype: u16 = NP_NORMAL;
        let status = unsafe {
            newstream(
                self.npp(),
                mime.as_ptr() as *mut c_char,
                handle.native,
                seekable as NPBool,
                &mut stype,
            )
        };
        if !status.is_ok() {
            // Never opened from the module's point of view, so it is not told
            // about the end either.
            let _ = lock(&self.streams).destroy(handle.id, NPReason::NETWORK_ERR);
            log::debug!("Session {}: module refused stream for '{}': {}", self.id, url, status);
            return Err(StreamError::Rejected(status));
        }

        let mut streams = lock(&self.streams);
        streams.set_mode(handle.id, stype);
        if stype == NP_SEEK {
            streams.mark_seekable(handle.id);
        }
        Ok((handle, stype))
    }

    /// Hand `data` to the module the way its transfer mode asks for.
    /// `position` is set for answers to range reads; sequential data continues
    /// where the previous piece ended.
    fn feed(
        &self,
        funcs: &NPPluginFuncs,
        id: StreamId,
        native: *mut NPStream,
        data: &[u8],
        position: Option<u64>,
    ) -> Result<Pump, StreamError> {
        let (mode, transferred) = {
            let streams = lock(&self.streams);
            match (streams.mode(id), streams.transferred(id)) {
                (Some(mode), Some(transferred)) => (mode, transferred),
                _ => return Ok(Pump::Gone),
            }
        };
        if position.is_none() && matches!(mode, NP_ASFILE | NP_ASFILEONLY) {
            let mut streams = lock(&self.streams);
            streams.append_spool(id, data)?;
            if mode == NP_ASFILEONLY {
                streams.note_transferred(id, data.len() as u64);
                return Ok(Pump::Completed);
            }
        }
        Ok(self.pump(funcs, id, native, data, position.unwrap_or(transferred)))
    }

    /// Push host content into the module as a new stream.
    pub(crate) fn deliver_stream(&self, delivery: StreamDelivery) -> Result<DeliveryOutcome, StreamError> {
        let (StreamHandle { id, native }, mode) = self.open_to_module(StreamSpec::to_module(&delivery))?;
        if mode == NP_SEEK {
            log::debug!("Session {}: stream {} awaits range reads", self.id, id);
            return Ok(DeliveryOutcome::AwaitingReads(id));
        }

        let funcs = self.funcs();
        let reason = match self.feed(&funcs, id, native, &delivery.data, None) {
            Ok(Pump::Completed) => NPReason::DONE,
            Ok(Pump::Aborted(reason)) => reason,
            Ok(Pump::Gone) => return Ok(DeliveryOutcome::Finished(self.closed_reason(id))),
            Err(e) => {
                let _ = self.finish_stream(id, NPReason::NETWORK_ERR);
                return Err(e);
            }
        };

        match self.end_incoming(id, reason) {
            Ok(()) => Ok(DeliveryOutcome::Finished(self.closed_reason(id))),
            Err(StreamError::UnknownStream(_)) => Ok(DeliveryOutcome::Finished(self.closed_reason(id))),
            Err(e) => Err(e),
        }
    }

    /// Open a host-delivered stream whose bytes arrive later.
    pub(crate) fn begin_stream(&self, stream: IncomingStream) -> Result<StreamInfo, StreamError> {
        let (handle, _) = self.open_to_module(StreamSpec::incoming(&stream))?;
        lock(&self.streams).info(handle.id).ok_or(StreamError::UnknownStream(handle.id))
    }

    /// Feed a piece of an open host-delivered stream. Returns `false` once
    /// the stream has ended, either because the module destroyed it or
    /// because it stopped accepting data.
    pub(crate) fn push_stream(&self, id: StreamId, data: &[u8], position: Option<u64>) -> Result<bool, StreamError> {
        self.ensure_streaming()?;
        let native = {
            let mut streams = lock(&self.streams);
            let info = streams.info(id).ok_or(StreamError::UnknownStream(id))?;
            if info.direction != StreamDirection::ToModule {
                return Err(StreamError::WrongDirection { id, operation: "push" });
            }
            streams.native(id).ok_or(StreamError::UnknownStream(id))?
        };
        match self.feed(&self.funcs(), id, native, data, position) {
            Ok(Pump::Completed) => Ok(true),
            Ok(Pump::Gone) => Ok(false),
            Ok(Pump::Aborted(reason)) => {
                if let Err(e) = self.finish_stream(id, reason) {
                    log::debug!("Session {}: {}", self.id, e);
                }
                Ok(false)
            }
            Err(e) => {
                let _ = self.finish_stream(id, NPReason::NETWORK_ERR);
                Err(e)
            }
        }
    }

    /// End a host-delivered stream. On normal completion a stream in a file
    /// mode is first handed over with `NPP_StreamAsFile`.
    pub(crate) fn end_incoming(&self, id: StreamId, reason: NPReason) -> Result<(), StreamError> {
        let mode = lock(&self.streams).mode(id).ok_or(StreamError::UnknownStream(id))?;
        if reason.is_done() && matches!(mode, NP_ASFILE | NP_ASFILEONLY) {
            if let Err(e) = self.hand_over_file(id) {
                let _ = self.finish_stream(id, NPReason::NETWORK_ERR);
                return Err(e);
            }
            if !self.stream_open(id) {
                return Ok(());
            }
        }
        self.finish_stream(id, reason)
    }

    fn closed_reason(&self, id: StreamId) -> NPReason {
        lock(&self.streams)
            .closed()
            .find(|(closed, _)| *closed == id)
            .map(|(_, reason)| *reason)
            .unwrap_or(NPReason::USER_BREAK)
    }

    /// The `NPP_WriteReady`/`NPP_Write` loop.
    fn pump(&self, funcs: &NPPluginFuncs, id: StreamId, native: *mut NPStream, data: &[u8], base: u64) -> Pump {
        let config = active_config();
        let Some(write) = funcs.write else {
            log::warn!("Module '{}' has no NPP_Write; aborting stream {}", self.module.name(), id);
            return Pump::Aborted(NPReason::NETWORK_ERR);
        };
        let chunk = config.max_write_chunk as usize;
        let mut offset = 0usize;
        let mut stalls = 0u32;

        while offset < data.len() {
            if !self.stream_open(id) {
                return Pump::Gone;
            }
            let ready = match funcs.writeready {
                Some(writeready) => unsafe { writeready(self.npp(), native) },
                None => chunk as i32,
            };
            if ready <= 0 {
                stalls += 1;
                if stalls >= config.write_ready_retries {
                    log::warn!("Session {}: stream {} stalled after {} attempts", self.id, id, stalls);
                    return Pump::Aborted(NPReason::NETWORK_ERR);
                }
                continue;
            }

            let len = (ready as usize).min(chunk).min(data.len() - offset);
            let buffer = data[offset..offset + len].as_ptr() as *mut c_void;
            let position = (base + offset as u64).min(i32::MAX as u64) as i32;
            let consumed = unsafe { write(self.npp(), native, position, len as i32, buffer) };
            if consumed < 0 {
                log::warn!("Session {}: module failed write on stream {} ({})", self.id, id, consumed);
                return Pump::Aborted(NPReason::NETWORK_ERR);
            }
            if consumed == 0 {
                stalls += 1;
                if stalls >= config.write_ready_retries {
                    return Pump::Aborted(NPReason::NETWORK_ERR);
                }
                continue;
            }
            stalls = 0;
            // A module claiming more than it was offered only consumed the offer.
            let consumed = (consumed as usize).min(len);
            offset += consumed;
            lock(&self.streams).note_transferred(id, consumed as u64);
        }
        if self.stream_open(id) { Pump::Completed } else { Pump::Gone }
    }

    fn hand_over_file(&self, id: StreamId) -> Result<(), StreamError> {
        let Some(asfile) = self.funcs().asfile else {
            log::warn!("Module '{}' asked for a file but has no NPP_StreamAsFile", self.module.name());
            return Ok(());
        };
        let (native, path) = {
            let mut streams = lock(&self.streams);
            let native = streams.native(id).ok_or(StreamError::UnknownStream(id))?;
            (native, streams.spool_path(id)?)
        };
        unsafe { asfile(self.npp(), native, path.as_ptr()) };
        Ok(())
    }

    /// End a stream with `reason`: tell the module (host-delivered streams)
    /// or the sink (module-created streams), then free the native record.
    pub(crate) fn finish_stream(&self, id: StreamId, reason: NPReason) -> Result<(), StreamError> {
        let mut record = lock(&self.streams).destroy(id, reason)?;
        if record.info().direction == StreamDirection::ToModule && self.module_alive() {
            if let Some(destroy) = self.funcs().destroystream {
                let status = unsafe { destroy(self.npp(), record.native_ptr(), reason) };
                if !status.is_ok() {
                    log::debug!("Session {}: NPP_DestroyStream for {} returned {}", self.id, id, status);
                }
            }
        }
        drop(record);
        Ok(())
    }

    fn lookup(&self, native: *const NPStream) -> Result<StreamId, StreamError> {
        lock(&self.streams).id_of(native).ok_or(StreamError::ForeignStream)
    }

    pub(crate) fn open_from_module(&self, spec: StreamSpec) -> *mut NPStream {
        lock(&self.streams).open(spec).native
    }

    pub(crate) fn write_from_module(&self, native: *const NPStream, data: &[u8]) -> Result<usize, StreamError> {
        let id = self.lookup(native)?;
        lock(&self.streams).write(id, data)
    }

    pub(crate) fn destroy_from_module(&self, native: *const NPStream, reason: NPReason) -> Result<(), StreamError> {
        let id = self.lookup(native)?;
        self.finish_stream(id, reason)
    }

    /// `NPN_RequestRead`: serve from held data, or pass the request on to the host.
    pub(crate) fn request_read(&self, native: *const NPStream, ranges: Vec<ByteRange>) -> Result<(), PluginSystemError> {
        let id = self.lookup(native)?;
        let plan = lock(&self.streams).request_partial_read(id, ranges.clone())?;
        match plan {
            ReadPlan::Serve(pieces) => {
                let funcs = self.funcs();
                let native = lock(&self.streams).native(id).ok_or(StreamError::UnknownStream(id))?;
                for (start, data, len) in pieces {
                    let slice = &data[start as usize..(start + len) as usize];
                    match self.pump(&funcs, id, native, slice, start) {
                        Pump::Completed => {}
                        Pump::Gone => break,
                        Pump::Aborted(reason) => {
                            self.finish_stream(id, reason)?;
                            break;
                        }
                    }
                }
                Ok(())
            }
            ReadPlan::Forward(info) => {
                let services = SharedServices::get().ok_or(StreamError::SessionInactive)?;
                services.plugin_manager().request_read(&info, &ranges)?;
                Ok(())
            }
        }
    }

    pub(crate) fn deliver_notify(&self, entry: PendingNotify, reason: NPReason) {
        if !self.module_alive() {
            return;
        }
        log::debug!(
            "Session {}: notifying '{}' with {:?}",
            self.id,
            entry.url.to_string_lossy(),
            reason
        );
        if let Some(urlnotify) = self.funcs().urlnotify {
            unsafe { urlnotify(self.npp(), entry.url.as_ptr(), reason, entry.token.as_ptr()) };
        }
    }

    /// Tear the session down: open streams and pending notifications end with
    /// `NPRES_USER_BREAK`, then `NPP_Destroy` runs. Only the first call acts.
    fn destroy(&self) -> Result<Option<SavedData>, PluginSystemError> {
        if self.destroying.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let open = lock(&self.streams).open_ids();
        for id in open {
            if let Err(e) = self.finish_stream(id, NPReason::USER_BREAK) {
                log::debug!("Session {}: {}", self.id, e);
            }
        }
        let pending = lock(&self.notifications).drain();
        for entry in pending {
            self.deliver_notify(entry, NPReason::USER_BREAK);
        }

        let result = if !self.is_started() {
            Ok(None)
        } else if !self.module_alive() {
            log::warn!(
                "Session {} outlived module '{}'; skipping NPP_Destroy",
                self.id,
                self.module.name()
            );
            Ok(None)
        } else {
            self.slot(self.funcs().destroy, "NPP_Destroy").and_then(|destroy| {
                let mut saved: *mut NPSavedData = std::ptr::null_mut();
                let status = unsafe { destroy(self.npp(), &mut saved) };
                let saved = unsafe { take_saved(saved) };
                self.check("NPP_Destroy", status).map(|()| saved)
            })
        };
        self.destroyed.store(true, Ordering::SeqCst);
        log::info!("Session {} destroyed", self.id);
        result
    }
}

impl fmt::Debug for InstancePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstancePeer")
            .field("id", &self.id)
            .field("module", &self.module.name())
            .field("started", &self.is_started())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Copies saved state into allocator memory for `NPP_New`. Null if there is
/// no allocator or it is out of memory.
fn alloc_saved(data: &SavedData) -> *mut NPSavedData {
    let Some(services) = SharedServices::get() else {
        return std::ptr::null_mut();
    };
    let Ok(len) = i32::try_from(data.0.len()) else {
        return std::ptr::null_mut();
    };
    let allocator = services.allocator();
    let record = allocator.alloc(size_of::<NPSavedData>() as u32) as *mut NPSavedData;
    if record.is_null() {
        return record;
    }
    let buf = allocator.alloc(data.0.len() as u32);
    if buf.is_null() && !data.0.is_empty() {
        unsafe { allocator.free(record as *mut c_void) };
        return std::ptr::null_mut();
    }
    unsafe {
        if !buf.is_null() {
            std::ptr::copy_nonoverlapping(data.0.as_ptr(), buf as *mut u8, data.0.len());
        }
        record.write(NPSavedData { len, buf });
    }
    record
}

/// Copies saved state out of a module's `NPP_Destroy` answer and frees it.
///
/// # Safety
/// `saved` must be null or a record allocated with `NPN_MemAlloc` whose
/// buffer (if any) was allocated the same way.
unsafe fn take_saved(saved: *mut NPSavedData) -> Option<SavedData> {
    if saved.is_null() {
        return None;
    }
    let NPSavedData { len, buf } = unsafe { saved.read() };
    let bytes = if buf.is_null() || len <= 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(buf as *const u8, len as usize) }.to_vec()
    };
    match SharedServices::get() {
        Some(services) => unsafe {
            services.allocator().free(buf);
            services.allocator().free(saved as *mut c_void);
        },
        None => log::warn!("No allocator installed; leaking saved data"),
    }
    Some(SavedData(bytes))
}

/// One live session of a legacy module.
///
/// Created by [`LegacyPlugin::create_instance`](crate::plugin_system::adapter::LegacyPlugin);
/// bound to the thread that drives the module. Dropping it destroys the
/// session if that has not happened yet.
pub struct SessionInstance {
    peer: Arc<InstancePeer>,
    _thread_bound: PhantomData<*const ()>,
}

impl SessionInstance {
    pub(crate) fn new(module: Arc<ModuleCore>) -> Self {
        module.session_opened();
        let peer = InstancePeer::create(module);
        log::debug!("Session {} created", peer.session_id());
        Self {
            peer,
            _thread_bound: PhantomData,
        }
    }

    pub fn id(&self) -> SessionId {
        self.peer.session_id()
    }

    /// The instance handle the module sees.
    pub fn npp(&self) -> NPP {
        self.peer.npp()
    }

    /// `NPP_New`.
    pub fn start(&self, config: InstanceConfig) -> Result<(), PluginSystemError> {
        self.peer.start(config)
    }

    /// `NPP_SetWindow`. The window record handed to the module stays at the
    /// same address for the life of the session.
    pub fn set_window(&self, geometry: &WindowGeometry) -> Result<(), PluginSystemError> {
        self.peer.set_window(geometry)
    }

    /// `NPP_HandleEvent`; `true` if the module handled the event.
    pub fn handle_event(&self, event: *mut c_void) -> Result<bool, PluginSystemError> {
        self.peer.handle_event(event)
    }

    pub fn print(&self, platform_print: *mut NPPrint) -> Result<(), PluginSystemError> {
        self.peer.print(platform_print)
    }

    pub fn get_value(&self, variable: PluginVariable) -> Result<PluginValue, PluginSystemError> {
        self.peer.get_value(variable)
    }

    pub fn set_value(&self, variable: NPNVariable, value: *mut c_void) -> Result<(), PluginSystemError> {
        self.peer.set_value(variable, value)
    }

    /// Deliver host content to the module as a stream.
    pub fn deliver_stream(&self, delivery: StreamDelivery) -> Result<DeliveryOutcome, PluginSystemError> {
        Ok(self.peer.deliver_stream(delivery)?)
    }

    /// Announce content whose bytes arrive later, fed with
    /// [`write_stream`](Self::write_stream) and ended with
    /// [`end_stream`](Self::end_stream). The returned info carries the
    /// transfer mode the module chose.
    pub fn begin_stream(&self, stream: IncomingStream) -> Result<StreamInfo, PluginSystemError> {
        Ok(self.peer.begin_stream(stream)?)
    }

    /// Feed the next piece of a stream opened with
    /// [`begin_stream`](Self::begin_stream). `false` once the stream has ended.
    pub fn write_stream(&self, id: StreamId, data: &[u8]) -> Result<bool, PluginSystemError> {
        Ok(self.peer.push_stream(id, data, None)?)
    }

    /// Answer a range the module asked for with `NPN_RequestRead`.
    pub fn write_range(&self, id: StreamId, offset: u64, data: &[u8]) -> Result<bool, PluginSystemError> {
        Ok(self.peer.push_stream(id, data, Some(offset))?)
    }

    /// End a host-delivered stream, handing spooled content over first when
    /// `reason` is `NPRES_DONE` and the module asked for a file.
    pub fn end_stream(&self, id: StreamId, reason: NPReason) -> Result<(), PluginSystemError> {
        Ok(self.peer.end_incoming(id, reason)?)
    }

    /// End an open stream of either direction immediately, e.g. when the
    /// user cancels a seekable one.
    pub fn close_stream(&self, id: StreamId, reason: NPReason) -> Result<(), PluginSystemError> {
        Ok(self.peer.finish_stream(id, reason)?)
    }

    pub fn open_streams(&self) -> Vec<StreamInfo> {
        lock(&self.peer.streams).open_streams()
    }

    /// Recently destroyed streams and the reason each ended with.
    pub fn closed_streams(&self) -> Vec<(StreamId, NPReason)> {
        lock(&self.peer.streams).closed().copied().collect()
    }

    pub fn pending_notifications(&self) -> usize {
        lock(&self.peer.notifications).len()
    }

    pub fn is_started(&self) -> bool {
        self.peer.is_started()
    }

    pub fn is_destroyed(&self) -> bool {
        self.peer.is_destroyed()
    }

    /// Set by the module through `NPN_SetValue(NPPVpluginWindowBool)`.
    pub fn is_windowless(&self) -> bool {
        self.peer.is_windowless()
    }

    pub fn is_transparent(&self) -> bool {
        self.peer.is_transparent()
    }

    /// `NPP_Destroy`, returning whatever state the module asked to keep.
    pub fn destroy(self) -> Result<Option<SavedData>, PluginSystemError> {
        self.peer.destroy()
    }
}

impl Drop for SessionInstance {
    fn drop(&mut self) {
        if let Err(e) = self.peer.destroy() {
            log::warn!("Session {}: {}", self.peer.session_id(), e);
        }
        self.peer.module.session_closed();
    }
}

impl fmt::Debug for SessionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionInstance").field(&self.peer).finish()
    }
}

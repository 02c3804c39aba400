//! The two opposing function tables and the module entry-point signatures.
//!
//! Slot order is the wire contract. Slots are `Option<fn>` so a null pointer
//! coming from (or going to) the module is representable; `None` and a null
//! pointer have the same layout.
use std::ffi::{c_char, c_void};
use std::mem::size_of;

use super::types::{
    JRIEnv, Jref, NPBool, NPByteRange, NPError, NPMIMEType, NPNVariable, NPP, NPPVariable,
    NPPrint, NPReason, NPRect, NPRegion, NPSavedData, NPStream, NPWindow,
};

/// Major version of the legacy ABI implemented by this host.
pub const NP_VERSION_MAJOR: u8 = 0;
/// Minor version of the legacy ABI implemented by this host.
pub const NP_VERSION_MINOR: u8 = 11;

/// Packs a version pair the way both tables carry it in their `version` field.
pub const fn pack_version(major: u8, minor: u8) -> u16 {
    ((major as u16) << 8) | minor as u16
}

// --- Module-side slots (called by the host) ---

pub type NppNewFn = unsafe extern "C" fn(
    plugin_type: NPMIMEType,
    instance: NPP,
    mode: u16,
    argc: i16,
    argn: *mut *mut c_char,
    argv: *mut *mut c_char,
    saved: *mut NPSavedData,
) -> NPError;
pub type NppDestroyFn = unsafe extern "C" fn(instance: NPP, save: *mut *mut NPSavedData) -> NPError;
pub type NppSetWindowFn = unsafe extern "C" fn(instance: NPP, window: *mut NPWindow) -> NPError;
pub type NppNewStreamFn = unsafe extern "C" fn(
    instance: NPP,
    mime_type: NPMIMEType,
    stream: *mut NPStream,
    seekable: NPBool,
    stype: *mut u16,
) -> NPError;
pub type NppDestroyStreamFn =
    unsafe extern "C" fn(instance: NPP, stream: *mut NPStream, reason: NPReason) -> NPError;
pub type NppStreamAsFileFn =
    unsafe extern "C" fn(instance: NPP, stream: *mut NPStream, fname: *const c_char);
pub type NppWriteReadyFn = unsafe extern "C" fn(instance: NPP, stream: *mut NPStream) -> i32;
pub type NppWriteFn = unsafe extern "C" fn(
    instance: NPP,
    stream: *mut NPStream,
    offset: i32,
    len: i32,
    buffer: *mut c_void,
) -> i32;
pub type NppPrintFn = unsafe extern "C" fn(instance: NPP, platform_print: *mut NPPrint);
pub type NppHandleEventFn = unsafe extern "C" fn(instance: NPP, event: *mut c_void) -> i16;
pub type NppUrlNotifyFn =
    unsafe extern "C" fn(instance: NPP, url: *const c_char, reason: NPReason, notify_data: *mut c_void);
pub type NppGetValueFn =
    unsafe extern "C" fn(instance: NPP, variable: NPPVariable, value: *mut c_void) -> NPError;
pub type NppSetValueFn =
    unsafe extern "C" fn(instance: NPP, variable: NPNVariable, value: *mut c_void) -> NPError;

/// Table the module fills in during `NP_GetEntryPoints`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NPPluginFuncs {
    pub size: u16,
    pub version: u16,
    pub newp: Option<NppNewFn>,
    pub destroy: Option<NppDestroyFn>,
    pub setwindow: Option<NppSetWindowFn>,
    pub newstream: Option<NppNewStreamFn>,
    pub destroystream: Option<NppDestroyStreamFn>,
    pub asfile: Option<NppStreamAsFileFn>,
    pub writeready: Option<NppWriteReadyFn>,
    pub write: Option<NppWriteFn>,
    pub print: Option<NppPrintFn>,
    pub event: Option<NppHandleEventFn>,
    pub urlnotify: Option<NppUrlNotifyFn>,
    /// Runtime global reference; unused by this host but part of the layout.
    pub java_class: *mut c_void,
    pub getvalue: Option<NppGetValueFn>,
    pub setvalue: Option<NppSetValueFn>,
}

impl NPPluginFuncs {
    /// An empty table with `size` preset, ready to be handed to the module.
    pub fn empty() -> Self {
        Self {
            size: size_of::<NPPluginFuncs>() as u16,
            version: 0,
            newp: None,
            destroy: None,
            setwindow: None,
            newstream: None,
            destroystream: None,
            asfile: None,
            writeready: None,
            write: None,
            print: None,
            event: None,
            urlnotify: None,
            java_class: std::ptr::null_mut(),
            getvalue: None,
            setvalue: None,
        }
    }

    pub fn major_version(&self) -> u8 {
        (self.version >> 8) as u8
    }

    pub fn minor_version(&self) -> u8 {
        (self.version & 0xff) as u8
    }
}

// --- Host-side slots (called by the module) ---

pub type NpnGetUrlFn =
    unsafe extern "C" fn(instance: NPP, url: *const c_char, target: *const c_char) -> NPError;
pub type NpnPostUrlFn = unsafe extern "C" fn(
    instance: NPP,
    url: *const c_char,
    target: *const c_char,
    len: u32,
    buf: *const c_char,
    file: NPBool,
) -> NPError;
pub type NpnRequestReadFn =
    unsafe extern "C" fn(stream: *mut NPStream, range_list: *mut NPByteRange) -> NPError;
pub type NpnNewStreamFn = unsafe extern "C" fn(
    instance: NPP,
    mime_type: NPMIMEType,
    target: *const c_char,
    stream: *mut *mut NPStream,
) -> NPError;
pub type NpnWriteFn =
    unsafe extern "C" fn(instance: NPP, stream: *mut NPStream, len: i32, buffer: *mut c_void) -> i32;
pub type NpnDestroyStreamFn =
    unsafe extern "C" fn(instance: NPP, stream: *mut NPStream, reason: NPReason) -> NPError;
pub type NpnStatusFn = unsafe extern "C" fn(instance: NPP, message: *const c_char);
pub type NpnUserAgentFn = unsafe extern "C" fn(instance: NPP) -> *const c_char;
pub type NpnMemAllocFn = unsafe extern "C" fn(size: u32) -> *mut c_void;
pub type NpnMemFreeFn = unsafe extern "C" fn(ptr: *mut c_void);
pub type NpnMemFlushFn = unsafe extern "C" fn(size: u32) -> u32;
pub type NpnReloadPluginsFn = unsafe extern "C" fn(reload_pages: NPBool);
pub type NpnGetJavaEnvFn = unsafe extern "C" fn() -> *mut JRIEnv;
pub type NpnGetJavaPeerFn = unsafe extern "C" fn(instance: NPP) -> Jref;
pub type NpnGetUrlNotifyFn = unsafe extern "C" fn(
    instance: NPP,
    url: *const c_char,
    target: *const c_char,
    notify_data: *mut c_void,
) -> NPError;
pub type NpnPostUrlNotifyFn = unsafe extern "C" fn(
    instance: NPP,
    url: *const c_char,
    target: *const c_char,
    len: u32,
    buf: *const c_char,
    file: NPBool,
    notify_data: *mut c_void,
) -> NPError;
pub type NpnGetValueFn =
    unsafe extern "C" fn(instance: NPP, variable: NPNVariable, value: *mut c_void) -> NPError;
pub type NpnSetValueFn =
    unsafe extern "C" fn(instance: NPP, variable: NPPVariable, value: *mut c_void) -> NPError;
pub type NpnInvalidateRectFn = unsafe extern "C" fn(instance: NPP, rect: *mut NPRect);
pub type NpnInvalidateRegionFn = unsafe extern "C" fn(instance: NPP, region: NPRegion);
pub type NpnForceRedrawFn = unsafe extern "C" fn(instance: NPP);

/// Table the host hands to every module in `NP_Initialize`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NPNetscapeFuncs {
    pub size: u16,
    pub version: u16,
    pub geturl: Option<NpnGetUrlFn>,
    pub posturl: Option<NpnPostUrlFn>,
    pub requestread: Option<NpnRequestReadFn>,
    pub newstream: Option<NpnNewStreamFn>,
    pub write: Option<NpnWriteFn>,
    pub destroystream: Option<NpnDestroyStreamFn>,
    pub status: Option<NpnStatusFn>,
    pub uagent: Option<NpnUserAgentFn>,
    pub memalloc: Option<NpnMemAllocFn>,
    pub memfree: Option<NpnMemFreeFn>,
    pub memflush: Option<NpnMemFlushFn>,
    pub reloadplugins: Option<NpnReloadPluginsFn>,
    pub get_java_env: Option<NpnGetJavaEnvFn>,
    pub get_java_peer: Option<NpnGetJavaPeerFn>,
    pub geturlnotify: Option<NpnGetUrlNotifyFn>,
    pub posturlnotify: Option<NpnPostUrlNotifyFn>,
    pub getvalue: Option<NpnGetValueFn>,
    pub setvalue: Option<NpnSetValueFn>,
    pub invalidaterect: Option<NpnInvalidateRectFn>,
    pub invalidateregion: Option<NpnInvalidateRegionFn>,
    pub forceredraw: Option<NpnForceRedrawFn>,
}

impl NPNetscapeFuncs {
    pub fn major_version(&self) -> u8 {
        (self.version >> 8) as u8
    }

    pub fn minor_version(&self) -> u8 {
        (self.version & 0xff) as u8
    }
}

// --- Entry points exported by the module ---
//
// `system` is stdcall on 32-bit Windows and the C convention elsewhere. The
// `-unwind` variant lets a panicking Rust module be caught instead of aborting.

pub type NpGetEntryPointsFn = unsafe extern "system-unwind" fn(funcs: *mut NPPluginFuncs) -> NPError;
pub type NpInitializeFn = unsafe extern "system-unwind" fn(funcs: *const NPNetscapeFuncs) -> NPError;
pub type NpShutdownFn = unsafe extern "system-unwind" fn() -> NPError;
pub type NpGetMimeDescriptionFn = unsafe extern "system-unwind" fn() -> *const c_char;
pub type NpGetValueFn =
    unsafe extern "system-unwind" fn(future: *mut c_void, variable: NPPVariable, value: *mut c_void) -> NPError;

/// Exported symbol names, NUL terminated for `libloading`.
pub const NP_GET_ENTRY_POINTS_SYMBOL: &[u8] = b"NP_GetEntryPoints\0";
pub const NP_INITIALIZE_SYMBOL: &[u8] = b"NP_Initialize\0";
pub const NP_SHUTDOWN_SYMBOL: &[u8] = b"NP_Shutdown\0";
pub const NP_GET_MIME_DESCRIPTION_SYMBOL: &[u8] = b"NP_GetMIMEDescription\0";
pub const NP_GET_VALUE_SYMBOL: &[u8] = b"NP_GetValue\0";

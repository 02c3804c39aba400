//! Scalar types, status codes and records shared by both function tables.
//!
//! Everything here is `#[repr(C)]` or `#[repr(transparent)]` and must keep the
//! exact layout a module built for the legacy ABI expects.
use std::ffi::{c_char, c_void};
use std::fmt;

/// Legacy boolean (`unsigned char`).
pub type NPBool = u8;

/// MIME type string handed to the module (`char*`).
pub type NPMIMEType = *mut c_char;

/// Opaque platform region handle.
pub type NPRegion = *mut c_void;

/// Status code returned by almost every legacy call (`int16`).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NPError(pub i16);

impl NPError {
    pub const NO_ERROR: NPError = NPError(0);
    pub const GENERIC_ERROR: NPError = NPError(1);
    pub const INVALID_INSTANCE_ERROR: NPError = NPError(2);
    pub const INVALID_FUNCTABLE_ERROR: NPError = NPError(3);
    pub const MODULE_LOAD_FAILED_ERROR: NPError = NPError(4);
    pub const OUT_OF_MEMORY_ERROR: NPError = NPError(5);
    pub const INVALID_PLUGIN_ERROR: NPError = NPError(6);
    pub const INVALID_PLUGIN_DIR_ERROR: NPError = NPError(7);
    pub const INCOMPATIBLE_VERSION_ERROR: NPError = NPError(8);
    pub const INVALID_PARAM: NPError = NPError(9);
    pub const INVALID_URL: NPError = NPError(10);
    pub const FILE_NOT_FOUND: NPError = NPError(11);
    pub const NO_DATA: NPError = NPError(12);
    pub const STREAM_NOT_SEEKABLE: NPError = NPError(13);

    pub fn is_ok(self) -> bool {
        self == Self::NO_ERROR
    }

    /// Symbolic name of the code, if it is one of the known ones.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "NPERR_NO_ERROR",
            1 => "NPERR_GENERIC_ERROR",
            2 => "NPERR_INVALID_INSTANCE_ERROR",
            3 => "NPERR_INVALID_FUNCTABLE_ERROR",
            4 => "NPERR_MODULE_LOAD_FAILED_ERROR",
            5 => "NPERR_OUT_OF_MEMORY_ERROR",
            6 => "NPERR_INVALID_PLUGIN_ERROR",
            7 => "NPERR_INVALID_PLUGIN_DIR_ERROR",
            8 => "NPERR_INCOMPATIBLE_VERSION_ERROR",
            9 => "NPERR_INVALID_PARAM",
            10 => "NPERR_INVALID_URL",
            11 => "NPERR_FILE_NOT_FOUND",
            12 => "NPERR_NO_DATA",
            13 => "NPERR_STREAM_NOT_SEEKABLE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for NPError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "NPError({})", self.0),
        }
    }
}

impl fmt::Display for NPError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reason code delivered with stream destruction and URL notification.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NPReason(pub i16);

impl NPReason {
    /// Normal completion.
    pub const DONE: NPReason = NPReason(0);
    pub const NETWORK_ERR: NPReason = NPReason(1);
    /// Cancelled, either by the user or by instance teardown.
    pub const USER_BREAK: NPReason = NPReason(2);

    pub fn is_done(self) -> bool {
        self == Self::DONE
    }
}

impl fmt::Debug for NPReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "NPRES_DONE"),
            1 => write!(f, "NPRES_NETWORK_ERR"),
            2 => write!(f, "NPRES_USER_BREAK"),
            other => write!(f, "NPReason({})", other),
        }
    }
}

/// Variables the module may query from the host (`NPN_GetValue`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NPNVariable(pub i32);

impl NPNVariable {
    pub const X_DISPLAY: NPNVariable = NPNVariable(1);
    pub const XT_APP_CONTEXT: NPNVariable = NPNVariable(2);
    pub const NETSCAPE_WINDOW: NPNVariable = NPNVariable(3);
    pub const JAVASCRIPT_ENABLED_BOOL: NPNVariable = NPNVariable(4);
    pub const ASD_ENABLED_BOOL: NPNVariable = NPNVariable(5);
    pub const IS_OFFLINE_BOOL: NPNVariable = NPNVariable(6);
}

/// Variables the host may query from the module, or the module may set on
/// the host (`NPP_GetValue`, `NPN_SetValue`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NPPVariable(pub i32);

impl NPPVariable {
    pub const PLUGIN_NAME_STRING: NPPVariable = NPPVariable(1);
    pub const PLUGIN_DESCRIPTION_STRING: NPPVariable = NPPVariable(2);
    pub const PLUGIN_WINDOW_BOOL: NPPVariable = NPPVariable(3);
    pub const PLUGIN_TRANSPARENT_BOOL: NPPVariable = NPPVariable(4);
}

/// Instance mode passed to `NPP_New`.
pub const NP_EMBED: u16 = 1;
pub const NP_FULL: u16 = 2;

/// Stream transfer modes a module may request from `NPP_NewStream`.
pub const NP_NORMAL: u16 = 1;
pub const NP_SEEK: u16 = 2;
pub const NP_ASFILE: u16 = 3;
pub const NP_ASFILEONLY: u16 = 4;

/// Per-instance record. `pdata` belongs to the module, `ndata` to the host.
#[repr(C)]
#[derive(Debug)]
#[allow(non_camel_case_types)]
pub struct NPP_t {
    pub pdata: *mut c_void,
    pub ndata: *mut c_void,
}

/// Instance handle as seen by the module.
pub type NPP = *mut NPP_t;

/// Stream record shared with the module for the stream's lifetime.
#[repr(C)]
#[derive(Debug)]
pub struct NPStream {
    pub pdata: *mut c_void,
    pub ndata: *mut c_void,
    pub url: *const c_char,
    pub end: u32,
    pub lastmodified: u32,
    pub notify_data: *mut c_void,
}

/// Singly linked list of byte ranges for `NPN_RequestRead`.
#[repr(C)]
#[derive(Debug)]
pub struct NPByteRange {
    /// Negative offsets count from the end of the stream.
    pub offset: i32,
    pub length: u32,
    pub next: *mut NPByteRange,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NPRect {
    pub top: u16,
    pub left: u16,
    pub bottom: u16,
    pub right: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NPWindow {
    pub window: *mut c_void,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub clip_rect: NPRect,
    #[cfg(unix)]
    pub ws_info: *mut c_void,
}

/// State a module may hand back from `NPP_Destroy` and receive again in
/// `NPP_New`. The buffer is allocated with `NPN_MemAlloc`.
#[repr(C)]
#[derive(Debug)]
pub struct NPSavedData {
    pub len: i32,
    pub buf: *mut c_void,
}

/// Platform print record; only ever passed through by pointer.
#[repr(C)]
pub struct NPPrint {
    _private: [u8; 0],
}

/// Embedded runtime environment handle.
#[repr(C)]
pub struct JRIEnv {
    _private: [u8; 0],
}

/// Embedded runtime class handle.
#[repr(C)]
pub struct JavaClass {
    _private: [u8; 0],
}

/// Embedded runtime object reference.
pub type Jref = *mut c_void;

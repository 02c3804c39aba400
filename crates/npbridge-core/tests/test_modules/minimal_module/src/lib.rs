//! The smallest module that loads: it can start and destroy instances and
//! nothing else.
#![allow(dead_code)]

use std::ffi::{c_char, c_void};

type Slot = Option<unsafe extern "C" fn()>;

#[repr(C)]
pub struct NPP_t {
    pub pdata: *mut c_void,
    pub ndata: *mut c_void,
}

#[repr(C)]
pub struct NPPluginFuncs {
    pub size: u16,
    pub version: u16,
    pub newp: Option<
        unsafe extern "C" fn(
            *mut c_char,
            *mut NPP_t,
            u16,
            i16,
            *mut *mut c_char,
            *mut *mut c_char,
            *mut c_void,
        ) -> i16,
    >,
    pub destroy: Option<unsafe extern "C" fn(*mut NPP_t, *mut *mut c_void) -> i16>,
    pub setwindow: Slot,
    pub newstream: Slot,
    pub destroystream: Slot,
    pub asfile: Slot,
    pub writeready: Slot,
    pub write: Slot,
    pub print: Slot,
    pub event: Slot,
    pub urlnotify: Slot,
    pub java_class: *mut c_void,
    pub getvalue: Slot,
    pub setvalue: Slot,
}

unsafe extern "C" fn npp_new(
    _plugin_type: *mut c_char,
    instance: *mut NPP_t,
    _mode: u16,
    _argc: i16,
    _argn: *mut *mut c_char,
    _argv: *mut *mut c_char,
    _saved: *mut c_void,
) -> i16 {
    if instance.is_null() {
        return 2;
    }
    0
}

unsafe extern "C" fn npp_destroy(_instance: *mut NPP_t, _save: *mut *mut c_void) -> i16 {
    0
}

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_Initialize(funcs: *const c_void) -> i16 {
    if funcs.is_null() {
        return 9;
    }
    0
}

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_GetEntryPoints(funcs: *mut NPPluginFuncs) -> i16 {
    if funcs.is_null() {
        return 9;
    }
    let table = &mut *funcs;
    table.version = 11;
    table.newp = Some(npp_new);
    table.destroy = Some(npp_destroy);
    0
}

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_Shutdown() -> i16 {
    0
}

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_GetMIMEDescription() -> *const c_char {
    b"application/x-minimal:min:Minimal module\0".as_ptr() as *const c_char
}

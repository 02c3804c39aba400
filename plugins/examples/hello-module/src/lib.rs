//! A small legacy module built against `npbridge_core::abi`.
//!
//! It accepts `application/x-hello`, counts the bytes of every stream it is
//! given and reports what it saw through `NPN_Status`. When the embedding
//! carries a `src` attribute the module fetches it with `NPN_GetURLNotify`.
//! A `seek` attribute makes it take streams in `NP_SEEK` mode instead.
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use npbridge_core::abi::tables::{pack_version, NPNetscapeFuncs, NPPluginFuncs};
use npbridge_core::abi::types::{
    NPBool, NPError, NPMIMEType, NPNVariable, NPPVariable, NPReason, NPSavedData, NPStream, NPWindow, NP_NORMAL,
    NP_SEEK, NPP,
};
use npbridge_core::abi::{NP_VERSION_MAJOR, NP_VERSION_MINOR};

pub const MIME_DESCRIPTION: &CStr = c"application/x-hello:hello:Hello module";
pub const PLUGIN_NAME: &CStr = c"Hello Module";
pub const PLUGIN_DESCRIPTION: &CStr = c"Counts the bytes of every stream it is given";

/// Token attached to the fetch of the `src` attribute.
const SRC_REQUEST: usize = 0x5243;

/// Largest piece accepted in one `NPP_Write`.
const WRITE_WINDOW: i32 = 4096;

static HOST: AtomicPtr<NPNetscapeFuncs> = AtomicPtr::new(ptr::null_mut());

#[derive(Debug, Default)]
struct Session {
    src: Option<String>,
    seek: bool,
    received: u64,
}

fn host() -> Option<&'static NPNetscapeFuncs> {
    // The host table outlives every module that was handed it.
    unsafe { HOST.load(Ordering::Acquire).as_ref() }
}

fn status(instance: NPP, message: &str) {
    let (Some(host), Ok(message)) = (host(), CString::new(message)) else {
        return;
    };
    if let Some(status) = host.status {
        unsafe { status(instance, message.as_ptr()) }
    }
}

/// # Safety
/// `instance` must be null or an instance handed to this module by the host.
unsafe fn session<'a>(instance: NPP) -> Option<&'a mut Session> {
    let instance = unsafe { instance.as_ref()? };
    unsafe { (instance.pdata as *mut Session).as_mut() }
}

/// # Safety
/// `argn` and `argv` must hold `argc` readable strings each.
unsafe fn attribute(argc: i16, argn: *mut *mut c_char, argv: *mut *mut c_char, name: &str) -> Option<String> {
    if argn.is_null() || argv.is_null() {
        return None;
    }
    (0..argc.max(0) as usize).find_map(|i| {
        let (key, value) = unsafe { (*argn.add(i), *argv.add(i)) };
        if key.is_null() || value.is_null() {
            return None;
        }
        let key = unsafe { CStr::from_ptr(key) }.to_string_lossy();
        key.eq_ignore_ascii_case(name)
            .then(|| unsafe { CStr::from_ptr(value) }.to_string_lossy().into_owned())
    })
}

fn describe(variable: NPPVariable, value: *mut c_void) -> NPError {
    if value.is_null() {
        return NPError::INVALID_PARAM;
    }
    let text = match variable {
        NPPVariable::PLUGIN_NAME_STRING => PLUGIN_NAME,
        NPPVariable::PLUGIN_DESCRIPTION_STRING => PLUGIN_DESCRIPTION,
        _ => return NPError::GENERIC_ERROR,
    };
    unsafe { *(value as *mut *const c_char) = text.as_ptr() };
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_new(
    plugin_type: NPMIMEType,
    instance: NPP,
    _mode: u16,
    argc: i16,
    argn: *mut *mut c_char,
    argv: *mut *mut c_char,
    _saved: *mut NPSavedData,
) -> NPError {
    let Some(record) = (unsafe { instance.as_mut() }) else {
        return NPError::INVALID_INSTANCE_ERROR;
    };
    let src = unsafe { attribute(argc, argn, argv, "src") };
    let seek = unsafe { attribute(argc, argn, argv, "seek") }
        .is_some_and(|value| !matches!(value.as_str(), "0" | "false"));
    let mime = if plugin_type.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(plugin_type) }.to_string_lossy().into_owned()
    };
    record.pdata = Box::into_raw(Box::new(Session {
        src: src.clone(),
        seek,
        received: 0,
    })) as *mut c_void;
    status(instance, &format!("hello: started for {}", mime));

    if let (Some(src), Some(host)) = (src, host()) {
        let (Some(geturlnotify), Ok(url)) = (host.geturlnotify, CString::new(src)) else {
            return NPError::NO_ERROR;
        };
        let err = unsafe { geturlnotify(instance, url.as_ptr(), ptr::null(), SRC_REQUEST as *mut c_void) };
        if !err.is_ok() {
            status(instance, &format!("hello: fetch refused ({})", err));
        }
    }
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_destroy(instance: NPP, save: *mut *mut NPSavedData) -> NPError {
    let Some(record) = (unsafe { instance.as_mut() }) else {
        return NPError::INVALID_INSTANCE_ERROR;
    };
    if !save.is_null() {
        unsafe { *save = ptr::null_mut() };
    }
    if !record.pdata.is_null() {
        let session = unsafe { Box::from_raw(record.pdata as *mut Session) };
        record.pdata = ptr::null_mut();
        status(instance, &format!("hello: destroyed after {} bytes", session.received));
    }
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_set_window(instance: NPP, window: *mut NPWindow) -> NPError {
    if let Some(window) = unsafe { window.as_ref() } {
        status(instance, &format!("hello: window {}x{}", window.width, window.height));
    }
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_new_stream(
    instance: NPP,
    _mime_type: NPMIMEType,
    _stream: *mut NPStream,
    _seekable: NPBool,
    stype: *mut u16,
) -> NPError {
    let Some(session) = (unsafe { session(instance) }) else {
        return NPError::INVALID_INSTANCE_ERROR;
    };
    if !stype.is_null() {
        unsafe { *stype = if session.seek { NP_SEEK } else { NP_NORMAL } };
    }
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_destroy_stream(instance: NPP, stream: *mut NPStream, reason: NPReason) -> NPError {
    let Some(session) = (unsafe { session(instance) }) else {
        return NPError::INVALID_INSTANCE_ERROR;
    };
    let url = unsafe { stream.as_ref() }
        .filter(|s| !s.url.is_null())
        .map(|s| unsafe { CStr::from_ptr(s.url) }.to_string_lossy().into_owned())
        .unwrap_or_default();
    let received = session.received;
    status(instance, &format!("hello: {} bytes from {} ({:?})", received, url, reason));
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_write_ready(_instance: NPP, _stream: *mut NPStream) -> i32 {
    WRITE_WINDOW
}

unsafe extern "C" fn npp_write(
    instance: NPP,
    _stream: *mut NPStream,
    _offset: i32,
    len: i32,
    _buffer: *mut c_void,
) -> i32 {
    let Some(session) = (unsafe { session(instance) }) else {
        return -1;
    };
    session.received += len.max(0) as u64;
    len
}

unsafe extern "C" fn npp_url_notify(instance: NPP, url: *const c_char, reason: NPReason, notify_data: *mut c_void) {
    if notify_data as usize != SRC_REQUEST {
        return;
    }
    let url = if url.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(url) }.to_string_lossy().into_owned()
    };
    let expected = unsafe { session(instance) }.and_then(|s| s.src.clone());
    if expected.as_deref() == Some(url.as_str()) {
        status(instance, &format!("hello: fetch of {} finished ({:?})", url, reason));
    }
}

unsafe extern "C" fn npp_get_value(_instance: NPP, variable: NPPVariable, value: *mut c_void) -> NPError {
    describe(variable, value)
}

unsafe extern "C" fn npp_set_value(_instance: NPP, _variable: NPNVariable, _value: *mut c_void) -> NPError {
    NPError::GENERIC_ERROR
}

#[unsafe(no_mangle)]
pub unsafe extern "system-unwind" fn NP_Initialize(funcs: *const NPNetscapeFuncs) -> NPError {
    if funcs.is_null() {
        return NPError::INVALID_FUNCTABLE_ERROR;
    }
    if unsafe { (*funcs).version } >> 8 > NP_VERSION_MAJOR as u16 {
        return NPError::INCOMPATIBLE_VERSION_ERROR;
    }
    HOST.store(funcs as *mut NPNetscapeFuncs, Ordering::Release);
    NPError::NO_ERROR
}

#[unsafe(no_mangle)]
pub unsafe extern "system-unwind" fn NP_GetEntryPoints(funcs: *mut NPPluginFuncs) -> NPError {
    let Some(table) = (unsafe { funcs.as_mut() }) else {
        return NPError::INVALID_FUNCTABLE_ERROR;
    };
    let result = catch_unwind(AssertUnwindSafe(move || {
        table.version = pack_version(NP_VERSION_MAJOR, NP_VERSION_MINOR);
        table.newp = Some(npp_new);
        table.destroy = Some(npp_destroy);
        table.setwindow = Some(npp_set_window);
        table.newstream = Some(npp_new_stream);
        table.destroystream = Some(npp_destroy_stream);
        table.writeready = Some(npp_write_ready);
        table.write = Some(npp_write);
        table.urlnotify = Some(npp_url_notify);
        table.getvalue = Some(npp_get_value);
        table.setvalue = Some(npp_set_value);
    }));
    match result {
        Ok(()) => NPError::NO_ERROR,
        Err(_) => {
            eprintln!("Panic occurred while filling the hello module table");
            NPError::GENERIC_ERROR
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "system-unwind" fn NP_Shutdown() -> NPError {
    HOST.store(ptr::null_mut(), Ordering::Release);
    NPError::NO_ERROR
}

#[unsafe(no_mangle)]
pub unsafe extern "system-unwind" fn NP_GetMIMEDescription() -> *const c_char {
    MIME_DESCRIPTION.as_ptr()
}

#[unsafe(no_mangle)]
pub unsafe extern "system-unwind" fn NP_GetValue(
    _future: *mut c_void,
    variable: NPPVariable,
    value: *mut c_void,
) -> NPError {
    describe(variable, value)
}

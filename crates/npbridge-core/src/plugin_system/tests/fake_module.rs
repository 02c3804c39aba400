//! An in-process legacy module for tests.
//!
//! Behaviour is scripted and every call recorded per thread, so tests running
//! in parallel do not see each other's modules.
use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_void, CStr};

use crate::abi::tables::{pack_version, NPNetscapeFuncs, NPPluginFuncs, NP_VERSION_MAJOR, NP_VERSION_MINOR};
use crate::abi::types::{
    NPBool, NPError, NPMIMEType, NPPVariable, NPPrint, NPReason, NPSavedData, NPStream, NPWindow, NPP,
    NP_NORMAL,
};
use crate::plugin_system::loader::{EntryPoints, ModuleLibrary};

#[derive(Debug, Clone)]
pub struct Script {
    pub init_status: NPError,
    pub entry_status: NPError,
    pub table_version: u16,
    pub new_status: NPError,
    pub stream_status: NPError,
    pub stream_type: u16,
    /// Answer of `NPP_WriteReady`; zero stalls the stream.
    pub write_ready: i32,
    /// Overrides the `NPP_Write` answer.
    pub write_result: Option<i32>,
    /// The module ends every stream itself on its first write.
    pub destroy_on_write: bool,
    pub saved_on_destroy: Option<Vec<u8>>,
    /// `(url, token)` requested with `NPN_GetURLNotify` from inside `NPP_New`.
    pub notify_on_new: Option<(&'static CStr, usize)>,
    pub with_mime_description: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            init_status: NPError::NO_ERROR,
            entry_status: NPError::NO_ERROR,
            table_version: pack_version(NP_VERSION_MAJOR, NP_VERSION_MINOR),
            new_status: NPError::NO_ERROR,
            stream_status: NPError::NO_ERROR,
            stream_type: NP_NORMAL,
            write_ready: 1024,
            write_result: None,
            destroy_on_write: false,
            saved_on_destroy: None,
            notify_on_new: None,
            with_mime_description: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Initialize { table: usize, populated: bool },
    GetEntryPoints,
    Shutdown,
    New { mime: String, mode: u16, args: Vec<(String, String)>, saved: Option<Vec<u8>> },
    HostCall { name: &'static str, status: NPError },
    Destroy,
    SetWindow { width: u32, height: u32, window: usize },
    NewStream { url: String, mime: String, seekable: bool, notify: usize, stream: usize },
    Write { offset: i32, data: Vec<u8> },
    AsFile { contents: Option<Vec<u8>> },
    DestroyStream { url: String, reason: NPReason },
    UrlNotify { url: String, reason: NPReason, token: usize },
    HandleEvent,
    Print,
}

thread_local! {
    static SCRIPT: RefCell<Script> = RefCell::new(Script::default());
    static EVENTS: RefCell<Vec<Event>> = const { RefCell::new(Vec::new()) };
    static HOST: Cell<*const NPNetscapeFuncs> = const { Cell::new(std::ptr::null()) };
}

/// Start a fresh module script on this thread.
pub fn reset(script: Script) {
    SCRIPT.with(|s| *s.borrow_mut() = script);
    EVENTS.with(|e| e.borrow_mut().clear());
}

pub fn script() -> Script {
    SCRIPT.with(|s| s.borrow().clone())
}

pub fn update(f: impl FnOnce(&mut Script)) {
    SCRIPT.with(|s| f(&mut s.borrow_mut()));
}

pub fn events() -> Vec<Event> {
    EVENTS.with(|e| e.borrow().clone())
}

/// Native record of the most recent stream announced with `NPP_NewStream`.
pub fn last_stream() -> *mut NPStream {
    EVENTS.with(|e| {
        e.borrow()
            .iter()
            .rev()
            .find_map(|ev| match ev {
                Event::NewStream { stream, .. } => Some(*stream as *mut NPStream),
                _ => None,
            })
            .expect("no stream announced")
    })
}

pub fn count(pred: impl Fn(&Event) -> bool) -> usize {
    EVENTS.with(|e| e.borrow().iter().filter(|ev| pred(ev)).count())
}

fn record(event: Event) {
    // Tolerates calls from thread-local destructors at thread exit.
    let _ = EVENTS.try_with(|e| e.borrow_mut().push(event));
}

/// The host table received in `NP_Initialize`.
pub fn host() -> &'static NPNetscapeFuncs {
    let table = HOST.with(Cell::get);
    assert!(!table.is_null(), "module has not been initialized on this thread");
    unsafe { &*table }
}

pub fn entry_points() -> EntryPoints {
    EntryPoints {
        get_entry_points: np_get_entry_points,
        initialize: np_initialize,
        shutdown: np_shutdown,
        get_mime_description: if script().with_mime_description {
            Some(np_get_mime_description)
        } else {
            None
        },
        get_value: Some(np_get_value),
    }
}

pub fn library(name: &str) -> ModuleLibrary {
    ModuleLibrary::from_entry_points(name, entry_points())
}

unsafe fn text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

pub unsafe extern "system-unwind" fn np_initialize(funcs: *const NPNetscapeFuncs) -> NPError {
    HOST.with(|h| h.set(funcs));
    let populated = !funcs.is_null() && unsafe { (*funcs).geturl.is_some() && (*funcs).forceredraw.is_some() };
    record(Event::Initialize {
        table: funcs as usize,
        populated,
    });
    script().init_status
}

pub unsafe extern "system-unwind" fn np_initialize_panics(_funcs: *const NPNetscapeFuncs) -> NPError {
    panic!("module exploded during init");
}

pub unsafe extern "system-unwind" fn np_get_entry_points(funcs: *mut NPPluginFuncs) -> NPError {
    record(Event::GetEntryPoints);
    let script = script();
    let table = unsafe { &mut *funcs };
    table.version = script.table_version;
    table.newp = Some(npp_new);
    table.destroy = Some(npp_destroy);
    table.setwindow = Some(npp_set_window);
    table.newstream = Some(npp_new_stream);
    table.destroystream = Some(npp_destroy_stream);
    table.asfile = Some(npp_stream_as_file);
    table.writeready = Some(npp_write_ready);
    table.write = Some(npp_write);
    table.print = Some(npp_print);
    table.event = Some(npp_handle_event);
    table.urlnotify = Some(npp_url_notify);
    table.getvalue = Some(npp_get_value);
    table.setvalue = None;
    script.entry_status
}

pub unsafe extern "system-unwind" fn np_shutdown() -> NPError {
    record(Event::Shutdown);
    NPError::NO_ERROR
}

pub unsafe extern "system-unwind" fn np_get_mime_description() -> *const c_char {
    c"application/x-fake:fake:Fake content".as_ptr()
}

pub unsafe extern "system-unwind" fn np_get_value(
    _future: *mut c_void,
    variable: NPPVariable,
    value: *mut c_void,
) -> NPError {
    let answer = match variable {
        NPPVariable::PLUGIN_NAME_STRING => c"Fake Module",
        NPPVariable::PLUGIN_DESCRIPTION_STRING => c"Scripted module used in tests",
        _ => return NPError::INVALID_PARAM,
    };
    unsafe { *(value as *mut *const c_char) = answer.as_ptr() };
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_new(
    plugin_type: NPMIMEType,
    instance: NPP,
    mode: u16,
    argc: i16,
    argn: *mut *mut c_char,
    argv: *mut *mut c_char,
    saved: *mut NPSavedData,
) -> NPError {
    let args = (0..argc.max(0) as usize)
        .map(|i| unsafe { (text(*argn.add(i)), text(*argv.add(i))) })
        .collect();
    let saved = if saved.is_null() {
        None
    } else {
        // The module owns saved data it receives.
        let data = unsafe {
            let record = &*saved;
            let bytes = std::slice::from_raw_parts(record.buf as *const u8, record.len as usize).to_vec();
            (host().memfree.unwrap())(record.buf);
            (host().memfree.unwrap())(saved as *mut c_void);
            bytes
        };
        Some(data)
    };
    record(Event::New {
        mime: unsafe { text(plugin_type) },
        mode,
        args,
        saved,
    });

    let script = script();
    if let Some((url, token)) = script.notify_on_new {
        let status = unsafe {
            (host().geturlnotify.unwrap())(instance, url.as_ptr(), std::ptr::null(), token as *mut c_void)
        };
        record(Event::HostCall {
            name: "geturlnotify",
            status,
        });
    }
    script.new_status
}

unsafe extern "C" fn npp_destroy(_instance: NPP, save: *mut *mut NPSavedData) -> NPError {
    record(Event::Destroy);
    if let Some(bytes) = script().saved_on_destroy {
        unsafe {
            let host = host();
            let record = (host.memalloc.unwrap())(std::mem::size_of::<NPSavedData>() as u32) as *mut NPSavedData;
            let buf = (host.memalloc.unwrap())(bytes.len() as u32);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, bytes.len());
            record.write(NPSavedData {
                len: bytes.len() as i32,
                buf,
            });
            *save = record;
        }
    }
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_set_window(_instance: NPP, window: *mut NPWindow) -> NPError {
    let window_ref = unsafe { &*window };
    record(Event::SetWindow {
        width: window_ref.width,
        height: window_ref.height,
        window: window as usize,
    });
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_new_stream(
    _instance: NPP,
    mime_type: NPMIMEType,
    stream: *mut NPStream,
    seekable: NPBool,
    stype: *mut u16,
) -> NPError {
    let stream_ref = unsafe { &*stream };
    record(Event::NewStream {
        url: unsafe { text(stream_ref.url) },
        mime: unsafe { text(mime_type) },
        seekable: seekable != 0,
        notify: stream_ref.notify_data as usize,
        stream: stream as usize,
    });
    let script = script();
    unsafe { *stype = script.stream_type };
    script.stream_status
}

unsafe extern "C" fn npp_destroy_stream(_instance: NPP, stream: *mut NPStream, reason: NPReason) -> NPError {
    record(Event::DestroyStream {
        url: unsafe { text((*stream).url) },
        reason,
    });
    NPError::NO_ERROR
}

unsafe extern "C" fn npp_stream_as_file(_instance: NPP, _stream: *mut NPStream, fname: *const c_char) {
    let path = unsafe { text(fname) };
    record(Event::AsFile {
        contents: std::fs::read(path).ok(),
    });
}

unsafe extern "C" fn npp_write_ready(_instance: NPP, _stream: *mut NPStream) -> i32 {
    script().write_ready
}

unsafe extern "C" fn npp_write(instance: NPP, stream: *mut NPStream, offset: i32, len: i32, buffer: *mut c_void) -> i32 {
    let data = unsafe { std::slice::from_raw_parts(buffer as *const u8, len as usize) }.to_vec();
    record(Event::Write { offset, data });
    let script = script();
    if script.destroy_on_write {
        let status = unsafe { (host().destroystream.unwrap())(instance, stream, NPReason::USER_BREAK) };
        record(Event::HostCall {
            name: "destroystream",
            status,
        });
    }
    script.write_result.unwrap_or(len)
}

unsafe extern "C" fn npp_print(_instance: NPP, _platform_print: *mut NPPrint) {
    record(Event::Print);
}

unsafe extern "C" fn npp_handle_event(_instance: NPP, _event: *mut c_void) -> i16 {
    record(Event::HandleEvent);
    1
}

unsafe extern "C" fn npp_url_notify(_instance: NPP, url: *const c_char, reason: NPReason, notify_data: *mut c_void) {
    record(Event::UrlNotify {
        url: unsafe { text(url) },
        reason,
        token: notify_data as usize,
    });
}

unsafe extern "C" fn npp_get_value(_instance: NPP, variable: NPPVariable, value: *mut c_void) -> NPError {
    match variable {
        NPPVariable::PLUGIN_NAME_STRING => {
            unsafe { *(value as *mut *const c_char) = c"Fake Instance".as_ptr() };
            NPError::NO_ERROR
        }
        NPPVariable::PLUGIN_WINDOW_BOOL => {
            unsafe { *(value as *mut NPBool) = 1 };
            NPError::NO_ERROR
        }
        _ => NPError::GENERIC_ERROR,
    }
}

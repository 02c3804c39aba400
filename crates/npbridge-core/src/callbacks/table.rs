use std::mem::size_of;
use std::sync::OnceLock;

use crate::abi::tables::{pack_version, NPNetscapeFuncs, NP_VERSION_MAJOR, NP_VERSION_MINOR};
use crate::callbacks::trampolines;

static CALLBACKS: OnceLock<CallbackTable> = OnceLock::new();

/// The host table handed to every module.
///
/// Built once per process on first use and never modified afterwards, so
/// the address a module receives in `NP_Initialize` stays valid for as long
/// as the process runs.
#[derive(Debug)]
pub struct CallbackTable {
    funcs: NPNetscapeFuncs,
}

// Only function pointers; nothing in the table is ever written again.
unsafe impl Send for CallbackTable {}
unsafe impl Sync for CallbackTable {}

impl CallbackTable {
    pub fn get_or_init() -> &'static CallbackTable {
        CALLBACKS.get_or_init(|| {
            let table = CallbackTable { funcs: build() };
            log::debug!(
                "Built host callback table (size {}, version {}.{})",
                table.funcs.size,
                NP_VERSION_MAJOR,
                NP_VERSION_MINOR
            );
            table
        })
    }

    /// The table, if any module has been created yet.
    pub fn get() -> Option<&'static CallbackTable> {
        CALLBACKS.get()
    }

    pub fn funcs(&self) -> &NPNetscapeFuncs {
        &self.funcs
    }

    pub fn as_ptr(&self) -> *const NPNetscapeFuncs {
        &self.funcs
    }
}

fn build() -> NPNetscapeFuncs {
    NPNetscapeFuncs {
        size: size_of::<NPNetscapeFuncs>() as u16,
        version: pack_version(NP_VERSION_MAJOR, NP_VERSION_MINOR),
        geturl: Some(trampolines::np_geturl),
        posturl: Some(trampolines::np_posturl),
        requestread: Some(trampolines::np_requestread),
        newstream: Some(trampolines::np_newstream),
        write: Some(trampolines::np_write),
        destroystream: Some(trampolines::np_destroystream),
        status: Some(trampolines::np_status),
        uagent: Some(trampolines::np_useragent),
        memalloc: Some(trampolines::np_memalloc),
        memfree: Some(trampolines::np_memfree),
        memflush: Some(trampolines::np_memflush),
        reloadplugins: Some(trampolines::np_reloadplugins),
        get_java_env: Some(trampolines::np_get_java_env),
        get_java_peer: Some(trampolines::np_get_java_peer),
        geturlnotify: Some(trampolines::np_geturlnotify),
        posturlnotify: Some(trampolines::np_posturlnotify),
        getvalue: Some(trampolines::np_getvalue),
        setvalue: Some(trampolines::np_setvalue),
        invalidaterect: Some(trampolines::np_invalidaterect),
        invalidateregion: Some(trampolines::np_invalidateregion),
        forceredraw: Some(trampolines::np_forceredraw),
    }
}

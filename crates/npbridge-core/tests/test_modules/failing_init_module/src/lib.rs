//! A module whose `NP_Initialize` always fails with
//! `NPERR_MODULE_LOAD_FAILED_ERROR`.
use std::ffi::c_void;

const NPERR_MODULE_LOAD_FAILED_ERROR: i16 = 4;

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_Initialize(funcs: *const c_void) -> i16 {
    if funcs.is_null() {
        return 9;
    }
    NPERR_MODULE_LOAD_FAILED_ERROR
}

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_GetEntryPoints(_funcs: *mut c_void) -> i16 {
    0
}

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_Shutdown() -> i16 {
    0
}

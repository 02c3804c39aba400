//! Exports every required entry point except `NP_Shutdown`.
use std::ffi::c_void;

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_Initialize(_funcs: *const c_void) -> i16 {
    0
}

#[no_mangle]
pub unsafe extern "system-unwind" fn NP_GetEntryPoints(_funcs: *mut c_void) -> i16 {
    0
}

// Misnamed on purpose; the host looks for `NP_Shutdown`.
#[no_mangle]
pub unsafe extern "system-unwind" fn NP_Shutdown_() -> i16 {
    0
}

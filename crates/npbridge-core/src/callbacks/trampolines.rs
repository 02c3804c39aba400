//! The `extern "C"` functions behind every host-table slot.
//!
//! Each one recovers the session from the instance handle (or the stream's
//! host data), forwards to [`SharedServices`] or the session, and maps the
//! outcome onto a legacy status. No panic may unwind into module code, so
//! every body runs inside [`guarded`].
use std::ffi::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::abi::types::{
    JRIEnv, JavaClass, Jref, NPBool, NPByteRange, NPError, NPMIMEType, NPNVariable, NPPVariable,
    NPReason, NPRect, NPRegion, NPStream, NPP,
};
use crate::callbacks::SharedServices;
use crate::host::HostServiceError;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::instance::{InstancePeer, SessionId};
use crate::plugin_system::notify::{ArmOutcome, NotifyToken, PostData, UrlRequest};
use crate::plugin_system::stream::{ByteRange, StreamPeer, StreamSpec};
use crate::utils::ffi::{collect_ranges, opt_nonempty_from_ptr, string_from_ptr};
use crate::utils::{lock, panic_message, SendPtr};

/// Runs `body`, turning a panic into `fallback`.
pub(crate) fn guarded<R>(operation: &'static str, fallback: R, body: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => {
            log::error!("Host fault in {}: {}", operation, panic_message(payload.as_ref()));
            fallback
        }
    }
}

unsafe fn peer(instance: NPP) -> Option<Arc<InstancePeer>> {
    unsafe { InstancePeer::from_npp(instance) }
}

unsafe fn request_url(
    instance: NPP,
    url: *const c_char,
    target: *const c_char,
    post: Option<PostData>,
    notify: Option<NotifyToken>,
) -> NPError {
    let Some(peer) = (unsafe { peer(instance) }) else {
        return NPError::INVALID_INSTANCE_ERROR;
    };
    let Some(url) = (unsafe { string_from_ptr(url) }) else {
        return NPError::INVALID_URL;
    };
    let target = unsafe { opt_nonempty_from_ptr(target) };
    let Some(services) = SharedServices::get() else {
        return NPError::GENERIC_ERROR;
    };

    let key = notify.map(|token| lock(&peer.notifications).register(&url, token));
    let request = UrlRequest::new(peer.clone(), url.clone(), target, key);
    // Caught here rather than by the outer guard so the pending entry is
    // still cancelled.
    let result = panic::catch_unwind(AssertUnwindSafe(|| match post {
        None => services.plugin_manager().get_url(request),
        Some(data) => services.plugin_manager().post_url(request, data),
    }))
    .unwrap_or_else(|payload| Err(HostServiceError::Refused(panic_message(payload.as_ref()))));

    match result {
        Ok(()) => {
            if let Some(key) = key {
                let outcome = lock(&peer.notifications).arm(key);
                if let ArmOutcome::Orphaned(entry) = outcome {
                    peer.deliver_notify(entry, NPReason::NETWORK_ERR);
                }
            }
            NPError::NO_ERROR
        }
        Err(e) => {
            let notified = key.is_some_and(|key| !lock(&peer.notifications).cancel(key));
            if notified {
                // Already notified; the status must not signal the request a second time.
                log::warn!(
                    "Session {}: request for '{}' failed after it was completed: {}",
                    peer.session_id(),
                    url,
                    e
                );
                return NPError::NO_ERROR;
            }
            log::debug!("Session {}: request for '{}' refused: {}", peer.session_id(), url, e);
            e.to_np_error()
        }
    }
}

pub(crate) unsafe extern "C" fn np_geturl(instance: NPP, url: *const c_char, target: *const c_char) -> NPError {
    guarded("NPN_GetURL", NPError::GENERIC_ERROR, || unsafe {
        request_url(instance, url, target, None, None)
    })
}

pub(crate) unsafe extern "C" fn np_posturl(
    instance: NPP,
    url: *const c_char,
    target: *const c_char,
    len: u32,
    buf: *const c_char,
    file: NPBool,
) -> NPError {
    guarded("NPN_PostURL", NPError::GENERIC_ERROR, || unsafe {
        let Some(data) = PostData::from_raw(len, buf as *const u8, file != 0) else {
            return NPError::INVALID_PARAM;
        };
        request_url(instance, url, target, Some(data), None)
    })
}

pub(crate) unsafe extern "C" fn np_geturlnotify(
    instance: NPP,
    url: *const c_char,
    target: *const c_char,
    notify_data: *mut c_void,
) -> NPError {
    guarded("NPN_GetURLNotify", NPError::GENERIC_ERROR, || unsafe {
        request_url(instance, url, target, None, Some(NotifyToken::from_ptr(notify_data)))
    })
}

pub(crate) unsafe extern "C" fn np_posturlnotify(
    instance: NPP,
    url: *const c_char,
    target: *const c_char,
    len: u32,
    buf: *const c_char,
    file: NPBool,
    notify_data: *mut c_void,
) -> NPError {
    guarded("NPN_PostURLNotify", NPError::GENERIC_ERROR, || unsafe {
        let Some(data) = PostData::from_raw(len, buf as *const u8, file != 0) else {
            return NPError::INVALID_PARAM;
        };
        request_url(instance, url, target, Some(data), Some(NotifyToken::from_ptr(notify_data)))
    })
}

pub(crate) unsafe extern "C" fn np_requestread(stream: *mut NPStream, range_list: *mut NPByteRange) -> NPError {
    guarded("NPN_RequestRead", NPError::GENERIC_ERROR, || unsafe {
        let Some(stream_peer) = StreamPeer::from_native(stream) else {
            return NPError::INVALID_PARAM;
        };
        let Some(peer) = InstancePeer::from_owner(stream_peer.owner) else {
            return NPError::INVALID_INSTANCE_ERROR;
        };
        let ranges: Vec<ByteRange> = collect_ranges(range_list).into_iter().map(ByteRange::from).collect();
        if ranges.is_empty() {
            return NPError::INVALID_PARAM;
        }
        match peer.request_read(stream, ranges) {
            Ok(()) => NPError::NO_ERROR,
            Err(e) => {
                log::debug!("Session {}: read request failed: {}", peer.session_id(), e);
                e.to_np_error()
            }
        }
    })
}

pub(crate) unsafe extern "C" fn np_newstream(
    instance: NPP,
    mime_type: NPMIMEType,
    target: *const c_char,
    stream: *mut *mut NPStream,
) -> NPError {
    guarded("NPN_NewStream", NPError::GENERIC_ERROR, || unsafe {
        let Some(peer) = peer(instance) else {
            return NPError::INVALID_INSTANCE_ERROR;
        };
        if stream.is_null() {
            return NPError::INVALID_PARAM;
        }
        let Some(mime_type) = string_from_ptr(mime_type) else {
            return NPError::INVALID_PARAM;
        };
        let target = string_from_ptr(target).unwrap_or_default();
        let Some(services) = SharedServices::get() else {
            return NPError::GENERIC_ERROR;
        };
        match services.plugin_manager().new_stream(peer.session_id(), &mime_type, &target) {
            Ok(sink) => {
                *stream = peer.open_from_module(StreamSpec::from_module(mime_type, target, sink));
                NPError::NO_ERROR
            }
            Err(e) => {
                log::debug!("Session {}: stream to '{}' refused: {}", peer.session_id(), target, e);
                e.to_np_error()
            }
        }
    })
}

pub(crate) unsafe extern "C" fn np_write(instance: NPP, stream: *mut NPStream, len: i32, buffer: *mut c_void) -> i32 {
    guarded("NPN_Write", -1, || unsafe {
        let Some(peer) = peer(instance) else {
            return -1;
        };
        if len < 0 || (buffer.is_null() && len > 0) {
            return -1;
        }
        let data: &[u8] = if len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(buffer as *const u8, len as usize)
        };
        match peer.write_from_module(stream, data) {
            Ok(written) => written.min(i32::MAX as usize) as i32,
            Err(e) => {
                log::debug!("Session {}: write failed: {}", peer.session_id(), e);
                -1
            }
        }
    })
}

pub(crate) unsafe extern "C" fn np_destroystream(instance: NPP, stream: *mut NPStream, reason: NPReason) -> NPError {
    guarded("NPN_DestroyStream", NPError::GENERIC_ERROR, || unsafe {
        let Some(peer) = peer(instance) else {
            return NPError::INVALID_INSTANCE_ERROR;
        };
        match peer.destroy_from_module(stream, reason) {
            Ok(()) => NPError::NO_ERROR,
            Err(e) => e.to_np_error(),
        }
    })
}

pub(crate) unsafe extern "C" fn np_status(instance: NPP, message: *const c_char) {
    guarded("NPN_Status", (), || unsafe {
        let (Some(peer), Some(services)) = (peer(instance), SharedServices::get()) else {
            return;
        };
        let message = string_from_ptr(message).unwrap_or_default();
        services.plugin_manager().status(peer.session_id(), &message);
    })
}

pub(crate) unsafe extern "C" fn np_useragent(_instance: NPP) -> *const c_char {
    guarded("NPN_UserAgent", std::ptr::null(), || {
        SharedServices::get().map_or(std::ptr::null(), |services| services.user_agent().as_ptr())
    })
}

pub(crate) unsafe extern "C" fn np_memalloc(size: u32) -> *mut c_void {
    guarded("NPN_MemAlloc", std::ptr::null_mut(), || {
        SharedServices::get().map_or(std::ptr::null_mut(), |services| services.allocator().alloc(size))
    })
}

pub(crate) unsafe extern "C" fn np_memfree(ptr: *mut c_void) {
    guarded("NPN_MemFree", (), || {
        if let Some(services) = SharedServices::get() {
            unsafe { services.allocator().free(ptr) };
        }
    })
}

pub(crate) unsafe extern "C" fn np_memflush(size: u32) -> u32 {
    guarded("NPN_MemFlush", 0, || {
        SharedServices::get().map_or(0, |services| services.allocator().flush(size))
    })
}

pub(crate) unsafe extern "C" fn np_reloadplugins(reload_pages: NPBool) {
    guarded("NPN_ReloadPlugins", (), || {
        if let Some(services) = SharedServices::get() {
            services.plugin_manager().reload_plugins(reload_pages != 0);
        }
    })
}

pub(crate) fn runtime_env(services: Option<&SharedServices>) -> *mut JRIEnv {
    services
        .and_then(SharedServices::runtime)
        .map_or(std::ptr::null_mut(), |runtime| runtime.env())
}

pub(crate) fn runtime_peer(services: Option<&SharedServices>, session: SessionId) -> Jref {
    services
        .and_then(SharedServices::runtime)
        .map_or(std::ptr::null_mut(), |runtime| runtime.peer(session))
}

pub(crate) fn runtime_class(services: Option<&SharedServices>, handle: *mut c_void) -> *mut JavaClass {
    services
        .and_then(SharedServices::runtime)
        .map_or(std::ptr::null_mut(), |runtime| runtime.class(handle))
}

pub(crate) unsafe extern "C" fn np_get_java_env() -> *mut JRIEnv {
    guarded("NPN_GetJavaEnv", std::ptr::null_mut(), || runtime_env(SharedServices::get()))
}

pub(crate) unsafe extern "C" fn np_get_java_peer(instance: NPP) -> Jref {
    guarded("NPN_GetJavaPeer", std::ptr::null_mut(), || unsafe {
        let Some(peer) = peer(instance) else {
            return std::ptr::null_mut();
        };
        runtime_peer(SharedServices::get(), peer.session_id())
    })
}

/// Runtime class lookup. Part of the legacy host API but not of the host
/// table; modules that want it link against the host directly.
///
/// # Safety
/// `handle` is passed through to the runtime bridge unchanged.
pub unsafe extern "C" fn np_get_java_class(handle: *mut c_void) -> *mut JavaClass {
    guarded("NPN_GetJavaClass", std::ptr::null_mut(), || {
        runtime_class(SharedServices::get(), handle)
    })
}

/// Answer a host-variable query.
unsafe fn host_value(instance: NPP, variable: NPNVariable, value: *mut c_void) -> Result<(), PluginSystemError> {
    let config = super::active_config();
    let flag = match variable {
        NPNVariable::JAVASCRIPT_ENABLED_BOOL => Some(config.javascript_enabled),
        NPNVariable::ASD_ENABLED_BOOL => Some(false),
        NPNVariable::IS_OFFLINE_BOOL => Some(config.offline),
        _ => None,
    };
    if let Some(flag) = flag {
        unsafe { *(value as *mut NPBool) = flag as NPBool };
        return Ok(());
    }

    match variable {
        NPNVariable::X_DISPLAY | NPNVariable::XT_APP_CONTEXT | NPNVariable::NETSCAPE_WINDOW => {
            let peer = unsafe { peer(instance) }.ok_or_else(|| PluginSystemError::InvalidState {
                operation: "NPN_GetValue".to_string(),
                state: "no session".to_string(),
            })?;
            let handle = SharedServices::get()
                .and_then(|services| services.plugin_manager().platform_handle(peer.session_id(), variable))
                .filter(|handle| !handle.is_null())
                .ok_or(PluginSystemError::UnsupportedVariable { variable: variable.0 })?;
            unsafe { *(value as *mut *mut c_void) = handle.0 };
            Ok(())
        }
        _ => Err(PluginSystemError::UnsupportedVariable { variable: variable.0 }),
    }
}

pub(crate) unsafe extern "C" fn np_getvalue(instance: NPP, variable: NPNVariable, value: *mut c_void) -> NPError {
    guarded("NPN_GetValue", NPError::GENERIC_ERROR, || unsafe {
        if value.is_null() {
            return NPError::INVALID_PARAM;
        }
        match host_value(instance, variable, value) {
            Ok(()) => NPError::NO_ERROR,
            Err(e) => {
                log::debug!("NPN_GetValue({}): {}", variable.0, e);
                e.to_np_error()
            }
        }
    })
}

pub(crate) unsafe extern "C" fn np_setvalue(instance: NPP, variable: NPPVariable, value: *mut c_void) -> NPError {
    guarded("NPN_SetValue", NPError::GENERIC_ERROR, || unsafe {
        let Some(peer) = peer(instance) else {
            return NPError::INVALID_INSTANCE_ERROR;
        };
        // The value is the boolean itself, carried in the pointer argument.
        let enabled = !value.is_null();
        match variable {
            NPPVariable::PLUGIN_WINDOW_BOOL => {
                peer.set_windowless(!enabled);
                NPError::NO_ERROR
            }
            NPPVariable::PLUGIN_TRANSPARENT_BOOL => {
                peer.set_transparent(enabled);
                NPError::NO_ERROR
            }
            other => PluginSystemError::UnsupportedVariable { variable: other.0 }.to_np_error(),
        }
    })
}

pub(crate) unsafe extern "C" fn np_invalidaterect(instance: NPP, rect: *mut NPRect) {
    guarded("NPN_InvalidateRect", (), || unsafe {
        if rect.is_null() {
            return;
        }
        if let (Some(peer), Some(services)) = (peer(instance), SharedServices::get()) {
            services.plugin_manager().invalidate_rect(peer.session_id(), *rect);
        }
    })
}

pub(crate) unsafe extern "C" fn np_invalidateregion(instance: NPP, region: NPRegion) {
    guarded("NPN_InvalidateRegion", (), || unsafe {
        if let (Some(peer), Some(services)) = (peer(instance), SharedServices::get()) {
            services.plugin_manager().invalidate_region(peer.session_id(), SendPtr(region));
        }
    })
}

pub(crate) unsafe extern "C" fn np_forceredraw(instance: NPP) {
    guarded("NPN_ForceRedraw", (), || unsafe {
        if let (Some(peer), Some(services)) = (peer(instance), SharedServices::get()) {
            services.plugin_manager().force_redraw(peer.session_id());
        }
    })
}

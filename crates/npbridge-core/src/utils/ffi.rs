use std::any::Any;
use std::ffi::{c_char, CStr, CString};

use crate::abi::types::NPByteRange;

/// Raw pointer that is allowed to cross into `Send`/`Sync` containers.
///
/// Everything behind these pointers is only touched from the module's call
/// thread; the wrapper exists so host services (which are `Send + Sync`) can
/// carry them around.
// Manual impls: derives would require the pointee (usually `c_void`) to
// implement the same traits.
pub struct SendPtr<T>(pub *mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

impl<T> PartialEq for SendPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl<T> Eq for SendPtr<T> {}

impl<T> std::hash::Hash for SendPtr<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> std::fmt::Debug for SendPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SendPtr({:p})", self.0)
    }
}

impl<T> SendPtr<T> {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl<T> Default for SendPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

/// Formats the payload of a caught panic.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s_ref) = payload.downcast_ref::<&'static str>() {
        (*s_ref).to_string()
    } else if let Some(s_obj) = payload.downcast_ref::<String>() {
        s_obj.clone()
    } else {
        "Unknown panic reason".to_string()
    }
}

/// Copies a module-supplied C string. `None` for null or non-UTF-8 input.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
pub unsafe fn string_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(str::to_owned)
}

/// Like [`string_from_ptr`] but treats null and empty strings as absent.
///
/// # Safety
/// Same as [`string_from_ptr`].
pub unsafe fn opt_nonempty_from_ptr(ptr: *const c_char) -> Option<String> {
    unsafe { string_from_ptr(ptr) }.filter(|s| !s.is_empty())
}

/// Builds a C string, dropping interior NUL bytes instead of failing.
pub fn lossy_cstring(value: &str) -> CString {
    CString::new(value.replace('\0', "")).unwrap_or_default()
}

/// Walks a module-supplied range list into owned `(offset, length)` pairs.
///
/// # Safety
/// `head` must be null or the first node of a well-formed, null-terminated
/// list that stays valid for the call.
pub unsafe fn collect_ranges(head: *const NPByteRange) -> Vec<(i32, u32)> {
    let mut ranges = Vec::new();
    let mut node = head;
    // Bounded so a cyclic list from a broken module cannot hang the host.
    while !node.is_null() && ranges.len() < 4096 {
        let range = unsafe { &*node };
        ranges.push((range.offset, range.length));
        node = range.next;
    }
    ranges
}

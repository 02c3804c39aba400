use std::alloc::{alloc, dealloc, Layout};
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::MemoryAllocator;

// Each block carries its total size in front so `free` can rebuild the layout.
const HEADER: usize = 16;
const ALIGN: usize = 16;

/// Allocator backed by the Rust global allocator.
///
/// Blocks are 16-byte aligned. Nothing is cached, so [`MemoryAllocator::flush`]
/// always reports zero bytes freed.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    outstanding_bytes: AtomicUsize,
    outstanding_blocks: AtomicUsize,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently handed out to modules (excluding headers).
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes.load(Ordering::Relaxed)
    }

    /// Number of live blocks.
    pub fn outstanding_blocks(&self) -> usize {
        self.outstanding_blocks.load(Ordering::Relaxed)
    }
}

impl MemoryAllocator for SystemAllocator {
    fn alloc(&self, size: u32) -> *mut c_void {
        let total = match (size as usize).checked_add(HEADER) {
            Some(total) => total,
            None => return std::ptr::null_mut(),
        };
        let layout = match Layout::from_size_align(total, ALIGN) {
            Ok(layout) => layout,
            Err(_) => return std::ptr::null_mut(),
        };
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            log::warn!("memalloc of {} bytes failed", size);
            return std::ptr::null_mut();
        }
        unsafe { (base as *mut usize).write(total) };
        self.outstanding_bytes.fetch_add(size as usize, Ordering::Relaxed);
        self.outstanding_blocks.fetch_add(1, Ordering::Relaxed);
        unsafe { base.add(HEADER) as *mut c_void }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        let base = unsafe { (ptr as *mut u8).sub(HEADER) };
        let total = unsafe { (base as *const usize).read() };
        // The layout was valid when the block was allocated.
        let layout = unsafe { Layout::from_size_align_unchecked(total, ALIGN) };
        unsafe { dealloc(base, layout) };
        self.outstanding_bytes.fetch_sub(total - HEADER, Ordering::Relaxed);
        self.outstanding_blocks.fetch_sub(1, Ordering::Relaxed);
    }

    fn flush(&self, _size: u32) -> u32 {
        0
    }
}

//! Aligned allocation.
//!
//! Thin, panic-free wrapper around [`std::alloc`] for callers (principally
//! the ABI layer) that need an explicitly aligned buffer to hand back
//! across the C boundary.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{CoreError, CoreErrorKind};

/// Allocates `size` bytes aligned to `align`.
///
/// `size` must be non-zero; `align` must be a power of two at least as wide
/// as a pointer. Any other input is [`CoreErrorKind::InvalidArgument`].
/// Allocator failure is [`CoreErrorKind::OutOfMemory`].
pub fn aligned_alloc(size: usize, align: usize) -> Result<NonNull<u8>, CoreError> {
    if size == 0 {
        return Err(CoreError::invalid_argument().with_context("size must be non-zero"));
    }
    if !align.is_power_of_two() || align < std::mem::size_of::<usize>() {
        return Err(CoreError::invalid_argument()
            .with_context("align must be a power of two >= pointer width"));
    }
    let layout = Layout::from_size_align(size, align)
        .map_err(|_| CoreError::invalid_argument().with_context("invalid layout"))?;
    // SAFETY: layout has non-zero size, validated above.
    let ptr = unsafe { alloc::alloc(layout) };
    NonNull::new(ptr).ok_or_else(CoreError::out_of_memory)
}

/// Frees a buffer previously returned by [`aligned_alloc`] with the same
/// `size`/`align`. A null pointer is a no-op.
///
/// # Safety
/// `ptr` must either be null or have been returned by [`aligned_alloc`]
/// with the exact same `size` and `align`, and not already freed.
pub unsafe fn aligned_free(ptr: *mut u8, size: usize, align: usize) {
    if ptr.is_null() {
        return;
    }
    let Ok(layout) = Layout::from_size_align(size, align) else {
        return;
    };
    // SAFETY: delegated to the caller's contract above.
    unsafe { alloc::dealloc(ptr, layout) };
}

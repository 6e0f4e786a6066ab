#![allow(unsafe_code)]
//! Shared FFI plumbing: C-string marshalling, panic containment, and the
//! cached fix-suggestion strings every numbered ABI function returns by
//! pointer.
//!
//! No function in this crate may unwind across the `extern "C"` boundary;
//! every exported entry point wraps its body in [`catch_unwind_or`].

use std::ffi::{c_char, CStr, CString};
use std::panic::{catch_unwind, UnwindSafe};
use std::sync::OnceLock;

use crate::error;
use crate::session::severity;

/// Borrows `ptr` as a `&str` for the duration of the call. `None` for a
/// null pointer or invalid UTF-8; never panics.
///
/// # Safety
/// `ptr`, if non-null, must point to a NUL-terminated byte sequence valid
/// for reads for at least the lifetime `'a`.
#[must_use]
pub unsafe fn borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees a valid NUL-terminated buffer.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Runs `f`, substituting `default` and recording a diagnostic if it
/// panics. This is the one place in the crate that may catch a panic,
/// since letting one unwind into a C caller is undefined behavior.
pub fn catch_unwind_or<F, R>(default: R, f: F) -> R
where
    F: FnOnce() -> R + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(value) => value,
        Err(_) => {
            #[cfg(feature = "diagnostics")]
            tracing::error!("panic caught at FFI boundary; returning fallback value");
            default
        }
    }
}

/// Writes `text` into `buffer` (capacity `size`), truncated to fit with a
/// trailing NUL, and returns the number of bytes written excluding the
/// NUL. Returns -1 for a null buffer or zero size without touching memory.
///
/// # Safety
/// `buffer` must be valid for writes of `size` bytes when non-null.
#[must_use]
pub unsafe fn write_c_string(text: &str, buffer: *mut c_char, size: usize) -> isize {
    if buffer.is_null() || size == 0 {
        return -1;
    }
    let capacity = size - 1; // room for the NUL
    let mut end = text.len().min(capacity);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let bytes = &text.as_bytes()[..end];

    // SAFETY: `buffer` is valid for `size` bytes per the caller contract,
    // and `end < size`.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), buffer, bytes.len());
        *buffer.add(bytes.len()) = 0;
    }
    isize::try_from(bytes.len()).unwrap_or(isize::MAX)
}

/// Writes `value` through `ptr` if it is non-null.
///
/// # Safety
/// `ptr`, if non-null, must be valid for a write of a `T`.
pub unsafe fn write_out<T>(ptr: *mut T, value: T) {
    if !ptr.is_null() {
        // SAFETY: caller guarantees validity per the function contract.
        unsafe {
            *ptr = value;
        }
    }
}

static FIX_SUGGESTIONS: OnceLock<[CString; 5]> = OnceLock::new();

/// Pointer to the stable, NUL-terminated fix-suggestion string for
/// `cause` (0..=4; any other value collapses to the "no pattern" string,
/// matching [`severity::fix_suggestion`]). The pointer is valid for the
/// life of the process.
#[must_use]
pub fn fix_suggestion_ptr(cause: u8) -> *const c_char {
    let table = FIX_SUGGESTIONS.get_or_init(|| {
        std::array::from_fn(|i| {
            CString::new(severity::fix_suggestion(i as u8)).unwrap_or_default()
        })
    });
    let index = if (cause as usize) < table.len() { cause as usize } else { 0 };
    table[index].as_ptr()
}

/// The numeric code of the calling thread's last recorded error (0 =
/// `Success`, meaning either no error has occurred or it has been cleared).
/// Meaningful only immediately after a call that returned a failure
/// sentinel; per-thread, matching the thread-local error context.
#[unsafe(no_mangle)]
pub extern "C" fn get_last_error_code() -> i32 {
    catch_unwind_or(0, || error::get_last_error().0.code())
}

/// Writes the calling thread's last recorded error message into `buffer`
/// (capacity `size`), truncated/NUL-terminated. Returns the number of bytes
/// written excluding the NUL, or -1 for a null buffer or zero size.
///
/// # Safety
/// `buffer` must be valid for writes of `size` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_last_error_message(buffer: *mut c_char, size: usize) -> isize {
    catch_unwind_or(-1, || {
        let (_, message) = error::get_last_error();
        // SAFETY: caller contract on `buffer`/`size`.
        unsafe { write_c_string(&message, buffer, size) }
    })
}

/// Resets the calling thread's error context to `Success`/empty.
#[unsafe(no_mangle)]
pub extern "C" fn clear_error() {
    catch_unwind_or((), error::clear_error);
}

#![allow(unsafe_code)]
//! C ABI surface for the binary config blob (C5).
//!
//! The summary table names these functions by `path` alone; the core
//! still needs the bytes to persist, so the ABI signatures below also
//! take an explicit payload buffer/length (the host's in-memory
//! configuration), matching how every other buffer-producing/consuming
//! entry point in this crate is shaped.

use std::ffi::c_char;

use super::common::{borrow_str, catch_unwind_or};
use crate::config;
use crate::error;

/// Saves `payload` (`payload_len` bytes) to `path` under the `MERC`
/// header. Returns 0 on success, negative on an invalid path or an
/// oversized payload.
///
/// # Safety
/// `path` must be a valid NUL-terminated string pointer. `payload`, if
/// `payload_len` is non-zero, must be valid for reads of `payload_len`
/// bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn save_binary_configuration(
    path: *const c_char,
    flags: u16,
    payload: *const u8,
    payload_len: usize,
) -> i32 {
    catch_unwind_or(-1, || {
        // SAFETY: caller contract on `path`.
        let Some(path) = (unsafe { borrow_str(path) }) else {
            error::set_error(error::CoreErrorKind::InvalidArgument, "path must be a valid non-null string");
            return -1;
        };
        if path.is_empty() {
            error::set_error(error::CoreErrorKind::InvalidArgument, "path must be non-empty");
            return -1;
        }
        let bytes: &[u8] = if payload.is_null() || payload_len == 0 {
            &[]
        } else {
            // SAFETY: caller contract on `payload`/`payload_len`.
            unsafe { std::slice::from_raw_parts(payload, payload_len) }
        };
        config::save_binary_configuration(std::path::Path::new(path), flags, bytes).map_or_else(
            |err| {
                error::set_error_from(&err);
                -1
            },
            |()| 0,
        )
    })
}

/// Loads and validates the `MERC`-headed blob at `path`, copying up to
/// `buffer_len` bytes of its payload into `buffer`. Returns the number of
/// payload bytes (which may exceed `buffer_len`, indicating truncation),
/// or negative on an invalid path, bad header, or checksum mismatch.
///
/// # Safety
/// `path` must be a valid NUL-terminated string pointer. `buffer`, if
/// `buffer_len` is non-zero, must be valid for writes of `buffer_len`
/// bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn load_binary_configuration(
    path: *const c_char,
    buffer: *mut u8,
    buffer_len: usize,
) -> isize {
    catch_unwind_or(-1, || {
        // SAFETY: caller contract on `path`.
        let Some(path) = (unsafe { borrow_str(path) }) else {
            error::set_error(error::CoreErrorKind::InvalidArgument, "path must be a valid non-null string");
            return -1;
        };
        if path.is_empty() {
            error::set_error(error::CoreErrorKind::InvalidArgument, "path must be non-empty");
            return -1;
        }
        let payload = match config::load_binary_configuration(std::path::Path::new(path)) {
            Ok(payload) => payload,
            Err(err) => {
                error::set_error_from(&err);
                return -1;
            }
        };
        if !buffer.is_null() && buffer_len > 0 {
            let copy_len = payload.len().min(buffer_len);
            // SAFETY: caller contract on `buffer`/`buffer_len`.
            unsafe {
                std::ptr::copy_nonoverlapping(payload.as_ptr(), buffer, copy_len);
            }
        }
        isize::try_from(payload.len()).unwrap_or(isize::MAX)
    })
}

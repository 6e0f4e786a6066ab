#![allow(unsafe_code)]
//! C ABI surface for the test orchestrator (C4).
//!
//! `TestContext` pointers are not owned: they address fixed slots in a
//! process-lifetime pool and are never freed by the host. A pointer is
//! only ever one this module itself handed back from
//! [`create_test_context`], so casting it back to `&'static TestContext`
//! on the way in is sound as long as the host doesn't fabricate one.

use std::ffi::c_char;

use super::common::{borrow_str, catch_unwind_or, write_c_string, write_out};
use crate::error;
use crate::orchestrator::{self, TestContext};

/// Claims a free context slot. Returns NULL on null/empty names or pool
/// exhaustion.
///
/// # Safety
/// `class` and `method` must each be either null or a valid
/// NUL-terminated string pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn create_test_context(
    class: *const c_char,
    method: *const c_char,
) -> *mut TestContext {
    catch_unwind_or(std::ptr::null_mut(), || {
        // SAFETY: caller contract on `class`/`method`.
        let class = unsafe { borrow_str(class) };
        let method = unsafe { borrow_str(method) };
        let (Some(class), Some(method)) = (class, method) else {
            error::set_error(error::CoreErrorKind::InvalidArgument, "class and method must be non-null");
            return std::ptr::null_mut();
        };
        orchestrator::create_test_context(class, method).map_or_else(
            || {
                if class.is_empty() || method.is_empty() {
                    error::set_error(error::CoreErrorKind::InvalidArgument, "class and method must be non-empty");
                } else {
                    error::set_error(error::CoreErrorKind::ResourceExhausted, "context pool exhausted");
                }
                std::ptr::null_mut()
            },
            |ctx| std::ptr::from_ref(ctx).cast_mut(),
        )
    })
}

/// # Safety
/// `ptr` must be either null or a value previously returned by
/// [`create_test_context`].
unsafe fn borrow_context<'a>(ptr: *mut TestContext) -> Option<&'a TestContext> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: caller contract; the pool is 'static.
        Some(unsafe { &*ptr })
    }
}

/// Stores per-test metrics. Returns 0 on success, negative on a null or
/// inactive context.
///
/// # Safety
/// `ctx`, if non-null, must be a value previously returned by
/// [`create_test_context`]. `grade`, if non-null, must be a valid
/// NUL-terminated string pointer.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn update_test_context(
    ctx: *mut TestContext,
    elapsed_ms: f64,
    memory_mb: f64,
    query_count: u32,
    cache_ratio: f64,
    score: f64,
    grade: *const c_char,
) -> i32 {
    catch_unwind_or(-1, || {
        // SAFETY: caller contracts on `ctx`/`grade`.
        let Some(ctx) = (unsafe { borrow_context(ctx) }) else {
            error::set_error(error::CoreErrorKind::InvalidArgument, "ctx must be non-null");
            return -1;
        };
        let grade = unsafe { borrow_str(grade) }.unwrap_or("");
        orchestrator::update_test_context(ctx, elapsed_ms, memory_mb, query_count, cache_ratio, score, grade)
            .map_or_else(
                |err| {
                    error::set_error_from(&err);
                    -1
                },
                |()| 0,
            )
    })
}

/// Records the N+1 detection result for this test. Returns 0 on success,
/// negative on a null or inactive context. A null `signature` is treated
/// as empty.
///
/// # Safety
/// `ctx`, if non-null, must be a value previously returned by
/// [`create_test_context`]. `signature`, if non-null, must be a valid
/// NUL-terminated string pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn update_n_plus_one_analysis(
    ctx: *mut TestContext,
    present: i32,
    severity: u8,
    signature: *const c_char,
) -> i32 {
    catch_unwind_or(-1, || {
        // SAFETY: caller contracts on `ctx`/`signature`.
        let Some(ctx) = (unsafe { borrow_context(ctx) }) else {
            error::set_error(error::CoreErrorKind::InvalidArgument, "ctx must be non-null");
            return -1;
        };
        let signature = unsafe { borrow_str(signature) };
        orchestrator::update_n_plus_one_analysis(ctx, present != 0, severity, signature).map_or_else(
            |err| {
                error::set_error_from(&err);
                -1
            },
            |()| 0,
        )
    })
}

/// Finalizes the context, publishing its record to the history journal.
/// Returns 0 on success, negative on a null context or a second finalize.
///
/// # Safety
/// `ctx`, if non-null, must be a value previously returned by
/// [`create_test_context`] and not already finalized.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn finalize_test_context(ctx: *mut TestContext) -> i32 {
    catch_unwind_or(-1, || {
        // SAFETY: caller contract on `ctx`.
        let Some(ctx) = (unsafe { borrow_context(ctx) }) else {
            error::set_error(error::CoreErrorKind::InvalidArgument, "ctx must be non-null");
            return -1;
        };
        orchestrator::finalize_and_record(ctx).map_or_else(
            |err| {
                error::set_error_from(&err);
                -1
            },
            |()| 0,
        )
    })
}

/// Writes the five orchestrator counters through the given out-pointers.
/// Any individual pointer may be null, in which case that field is
/// skipped.
///
/// # Safety
/// Every non-null out-pointer must be valid for a single write of its
/// pointee type.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_orchestrator_statistics(
    total_tests: *mut u64,
    total_violations: *mut u64,
    total_n_plus_one: *mut u64,
    active_contexts: *mut u64,
    history_entries: *mut u64,
) {
    catch_unwind_or((), || {
        let stats = orchestrator::orchestrator_statistics();
        // SAFETY: caller contract on each out-pointer.
        unsafe {
            write_out(total_tests, stats.total_tests);
            write_out(total_violations, stats.total_violations);
            write_out(total_n_plus_one, stats.total_n_plus_one);
            write_out(active_contexts, stats.active_contexts);
            write_out(history_entries, stats.history_entries);
        }
    });
}

/// Writes formatted, filtered journal entries into `buffer`. A null or
/// empty filter matches any value. Returns bytes written, or -1 on a null
/// buffer or zero size.
///
/// # Safety
/// `class_filter`/`method_filter`, if non-null, must be valid
/// NUL-terminated string pointers. `buffer` must be valid for writes of
/// `size` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn query_history_entries(
    class_filter: *const c_char,
    method_filter: *const c_char,
    start_ts: u64,
    end_ts: u64,
    buffer: *mut c_char,
    size: usize,
) -> isize {
    catch_unwind_or(-1, || {
        if buffer.is_null() || size == 0 {
            error::set_error(error::CoreErrorKind::InvalidArgument, "buffer must be non-null with nonzero size");
            return -1;
        }
        // SAFETY: caller contracts on `class_filter`/`method_filter`.
        let class_filter = unsafe { borrow_str(class_filter) };
        let method_filter = unsafe { borrow_str(method_filter) };
        let report = orchestrator::query_history_entries(class_filter, method_filter, start_ts, end_ts);
        // SAFETY: caller contract on `buffer`/`size`, checked above.
        unsafe { write_c_string(&report, buffer, size) }
    })
}

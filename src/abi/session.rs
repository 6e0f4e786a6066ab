#![allow(unsafe_code)]
//! C ABI surface for the session engine (C2).

use std::ffi::c_char;

use super::common::{borrow_str, catch_unwind_or, fix_suggestion_ptr};
use crate::error;
use crate::session::{self, Metrics};

/// Starts a session. Returns a positive handle, or -1 if `name` is null or
/// empty, or if every slot is occupied.
///
/// # Safety
/// `name` and `kind` must each be either null or a valid NUL-terminated
/// string pointer for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn start_performance_monitoring_enhanced(
    name: *const c_char,
    kind: *const c_char,
) -> i64 {
    catch_unwind_or(-1, || {
        // SAFETY: caller contract on `name`/`kind`.
        let name = unsafe { borrow_str(name) };
        let kind = unsafe { borrow_str(kind) };
        let Some(name) = name else {
            error::set_error(error::CoreErrorKind::InvalidArgument, "name must be a valid non-null string");
            return -1;
        };
        session::start(name, kind).unwrap_or_else(|err| {
            error::set_error_from(&err);
            -1
        })
    })
}

/// Ends a session, returning an owned pointer to its metrics, or NULL if
/// `handle` is invalid, stale, or already stopped. The returned pointer
/// must eventually be passed to [`free_metrics`].
#[unsafe(no_mangle)]
pub extern "C" fn stop_performance_monitoring_enhanced(handle: i64) -> *mut Metrics {
    catch_unwind_or(std::ptr::null_mut(), || {
        session::stop(handle).map_or_else(
            |err| {
                error::set_error_from(&err);
                std::ptr::null_mut()
            },
            |metrics| Box::into_raw(Box::new(metrics)),
        )
    })
}

/// Frees a pointer returned by [`stop_performance_monitoring_enhanced`].
/// Null is accepted and is a no-op.
///
/// # Safety
/// `ptr`, if non-null, must be a pointer previously returned by
/// [`stop_performance_monitoring_enhanced`] and not already freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free_metrics(ptr: *mut Metrics) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: caller contract above.
    drop(unsafe { Box::from_raw(ptr) });
}

/// # Safety
/// `ptr`, if non-null, must point to a live `Metrics` owned elsewhere.
unsafe fn with_metrics<R>(ptr: *const Metrics, default: R, f: impl FnOnce(&Metrics) -> R) -> R {
    if ptr.is_null() {
        return default;
    }
    // SAFETY: caller contract.
    f(unsafe { &*ptr })
}

macro_rules! metrics_accessor {
    ($name:ident, $ret:ty, $default:expr, $method:ident) => {
        /// # Safety
        /// `ptr`, if non-null, must point to a live `Metrics`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(ptr: *const Metrics) -> $ret {
            catch_unwind_or($default, || unsafe {
                with_metrics(ptr, $default, |m| m.$method())
            })
        }
    };
}

metrics_accessor!(get_elapsed_time_ms, f64, 0.0, elapsed_ms);
metrics_accessor!(get_memory_usage_mb, f64, 0.0, memory_usage_mb);
metrics_accessor!(get_memory_delta_mb, f64, 0.0, memory_delta_mb);
metrics_accessor!(get_query_count, u64, 0, query_count);
metrics_accessor!(get_cache_hit_count, u64, 0, cache_hit_count);
metrics_accessor!(get_cache_miss_count, u64, 0, cache_miss_count);
metrics_accessor!(get_cache_hit_ratio, f64, 0.0, cache_hit_ratio);
metrics_accessor!(calculate_n_plus_one_severity, u8, 0, calculate_n_plus_one_severity);
metrics_accessor!(estimate_n_plus_one_cause, u8, 0, estimate_n_plus_one_cause);

macro_rules! metrics_predicate {
    ($name:ident, $method:ident) => {
        /// # Safety
        /// `ptr`, if non-null, must point to a live `Metrics`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(ptr: *const Metrics) -> i32 {
            catch_unwind_or(0, || unsafe {
                with_metrics(ptr, 0, |m| i32::from(m.$method()))
            })
        }
    };
}

metrics_predicate!(has_n_plus_one_pattern, has_n_plus_one_pattern);
metrics_predicate!(detect_n_plus_one_severe, detect_n_plus_one_severe);
metrics_predicate!(detect_n_plus_one_moderate, detect_n_plus_one_moderate);
metrics_predicate!(detect_n_plus_one_pattern_by_count, detect_n_plus_one_pattern_by_count);

/// Pointer to a stable, NUL-terminated fix-suggestion string. Never NULL,
/// even for a null `ptr` (returns the "no pattern" default).
///
/// # Safety
/// `ptr`, if non-null, must point to a live `Metrics`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_n_plus_one_fix_suggestion(ptr: *const Metrics) -> *const c_char {
    catch_unwind_or(fix_suggestion_ptr(0), || {
        let cause = unsafe { with_metrics(ptr, 0, |m| m.estimate_n_plus_one_cause()) };
        fix_suggestion_ptr(cause)
    })
}

/// No-op if the calling thread has no bound session.
#[unsafe(no_mangle)]
pub extern "C" fn increment_query_count() {
    catch_unwind_or((), session::increment_query_count);
}

/// No-op if the calling thread has no bound session.
#[unsafe(no_mangle)]
pub extern "C" fn increment_cache_hits() {
    catch_unwind_or((), session::increment_cache_hits);
}

/// No-op if the calling thread has no bound session.
#[unsafe(no_mangle)]
pub extern "C" fn increment_cache_misses() {
    catch_unwind_or((), session::increment_cache_misses);
}

#[unsafe(no_mangle)]
pub extern "C" fn reset_global_counters() {
    catch_unwind_or((), session::reset_global_counters);
}

#[unsafe(no_mangle)]
pub extern "C" fn set_current_session_id(id: i64) {
    catch_unwind_or((), || session::set_current_session_id(id));
}

#[unsafe(no_mangle)]
pub extern "C" fn get_current_session_id() -> i64 {
    catch_unwind_or(0, session::get_current_session_id)
}

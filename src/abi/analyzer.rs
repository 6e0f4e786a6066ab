#![allow(unsafe_code)]
//! C ABI surface for the query analyzer (C3).

use std::ffi::c_char;

use super::common::{borrow_str, catch_unwind_or, fix_suggestion_ptr, write_c_string, write_out};
use crate::analyzer;
use crate::error;

/// Normalizes, clusters, and accounts for one observed query. Returns 0,
/// or -1 if `text` is null.
///
/// # Safety
/// `text`, if non-null, must be a valid NUL-terminated string pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn analyze_query(text: *const c_char, exec_time_ms: f64) -> i32 {
    catch_unwind_or(-1, || {
        // SAFETY: caller contract on `text`.
        let text = unsafe { borrow_str(text) };
        let result = analyzer::analyze_query(text, exec_time_ms);
        if result < 0 {
            error::set_error(error::CoreErrorKind::InvalidArgument, "text must be a valid non-null string");
        }
        result
    })
}

/// Writes a textual report of duplicate-query clusters (count >= 2) into
/// `buffer`. Returns bytes written, or -1 on a null buffer or zero size.
///
/// # Safety
/// `buffer` must be valid for writes of `size` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_duplicate_queries(buffer: *mut c_char, size: usize) -> isize {
    catch_unwind_or(-1, || {
        let report = analyzer::duplicate_queries_report();
        // SAFETY: caller contract on `buffer`/`size`.
        let written = unsafe { write_c_string(&report, buffer, size) };
        if written < 0 {
            error::set_error(error::CoreErrorKind::InvalidArgument, "buffer must be non-null with nonzero size");
        }
        written
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn detect_n_plus_one_patterns() -> i32 {
    catch_unwind_or(0, analyzer::detect_n_plus_one_patterns)
}

#[unsafe(no_mangle)]
pub extern "C" fn get_n_plus_one_severity() -> u8 {
    catch_unwind_or(0, analyzer::get_n_plus_one_severity)
}

#[unsafe(no_mangle)]
pub extern "C" fn get_n_plus_one_cause() -> u8 {
    catch_unwind_or(0, analyzer::get_n_plus_one_cause)
}

/// Never NULL; returns the stable default string when no pattern has ever
/// been detected.
#[unsafe(no_mangle)]
pub extern "C" fn get_optimization_suggestion() -> *const c_char {
    catch_unwind_or(fix_suggestion_ptr(0), || {
        fix_suggestion_ptr(analyzer::get_n_plus_one_cause())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn reset_query_analyzer() {
    catch_unwind_or((), analyzer::reset_query_analyzer);
}

/// Writes the four analyzer counters through the given out-pointers. Any
/// individual pointer may be null, in which case that field is skipped.
///
/// # Safety
/// Every non-null out-pointer must be valid for a single write of its
/// pointee type.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn get_query_statistics(
    total: *mut u64,
    n_plus_one_detected: *mut u64,
    similar: *mut u64,
    active_clusters: *mut u64,
) {
    catch_unwind_or((), || {
        let stats = analyzer::query_statistics();
        // SAFETY: caller contract on each out-pointer.
        unsafe {
            write_out(total, stats.total);
            write_out(n_plus_one_detected, stats.n_plus_one_detected);
            write_out(similar, stats.similar);
            write_out(active_clusters, stats.active_clusters);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn analyze_query_null_text_returns_negative_one() {
        assert_eq!(unsafe { analyze_query(std::ptr::null(), 1.0) }, -1);
    }

    #[test]
    fn analyze_query_valid_text_returns_zero() {
        let text = CString::new("SELECT 1").unwrap();
        assert_eq!(unsafe { analyze_query(text.as_ptr(), 1.0) }, 0);
    }

    #[test]
    fn get_duplicate_queries_rejects_null_buffer_and_zero_size() {
        assert_eq!(unsafe { get_duplicate_queries(std::ptr::null_mut(), 10) }, -1);
        let mut buf = [0 as c_char; 8];
        assert_eq!(unsafe { get_duplicate_queries(buf.as_mut_ptr(), 0) }, -1);
    }

    #[test]
    fn get_query_statistics_tolerates_null_out_pointers() {
        unsafe {
            get_query_statistics(std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut());
        }
    }

    #[test]
    fn analyze_query_null_text_populates_error_context() {
        crate::error::clear_error();
        assert_eq!(unsafe { analyze_query(std::ptr::null(), 1.0) }, -1);
        let (kind, _) = crate::error::get_last_error();
        assert_eq!(kind, crate::error::CoreErrorKind::InvalidArgument);
    }

    #[test]
    fn get_query_statistics_writes_through_non_null_pointers() {
        reset_query_analyzer();
        let text = CString::new("SELECT pointer_test").unwrap();
        unsafe { analyze_query(text.as_ptr(), 1.0) };

        let mut total = 0u64;
        unsafe {
            get_query_statistics(&raw mut total, std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut());
        }
        assert!(total >= 1);
    }
}

#![allow(unsafe_code)]
//! Resident-memory sampling.
//!
//! A single best-effort reading of the process's current resident set
//! size, used to stamp sessions at start/stop. Sampling failure is not
//! fatal anywhere it is used: callers substitute the documented `-1.0`
//! sentinel for the megabyte delta rather than abort.

/// Samples current resident memory in bytes. `None` on any platform or
/// I/O failure; never panics.
#[must_use]
pub fn sample_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        return linux_statm_rss_bytes();
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        return unix_getrusage_rss_bytes();
    }
    #[cfg(windows)]
    {
        return windows_working_set_bytes();
    }
    #[allow(unreachable_code)]
    None
}

#[cfg(target_os = "linux")]
fn linux_statm_rss_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = contents.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = page_size_bytes()?;
    rss_pages.checked_mul(page_size)
}

#[cfg(target_os = "linux")]
fn page_size_bytes() -> Option<u64> {
    // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions and never
    // mutates process state.
    let value = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if value <= 0 {
        None
    } else {
        Some(value as u64)
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn unix_getrusage_rss_bytes() -> Option<u64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: `usage` is a valid, zeroed `rusage` the kernel fills in.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &raw mut usage) };
    if rc != 0 {
        return None;
    }
    // macOS reports ru_maxrss in bytes; most other BSD-likes report KB.
    #[cfg(target_os = "macos")]
    {
        Some(usage.ru_maxrss as u64)
    }
    #[cfg(not(target_os = "macos"))]
    {
        (usage.ru_maxrss as u64).checked_mul(1024)
    }
}

#[cfg(windows)]
fn windows_working_set_bytes() -> Option<u64> {
    use windows_sys::Win32::System::ProcessStatus::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    let mut counters: PROCESS_MEMORY_COUNTERS = unsafe { std::mem::zeroed() };
    counters.cb = std::mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
    // SAFETY: `counters` is sized and zeroed per the Win32 contract above.
    let ok = unsafe {
        GetProcessMemoryInfo(
            GetCurrentProcess(),
            &raw mut counters,
            counters.cb,
        )
    };
    if ok == 0 {
        None
    } else {
        Some(counters.WorkingSetSize as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_succeeds_on_supported_platforms() {
        // Best-effort: we only assert it doesn't panic and, when it
        // succeeds, the value is plausible (a running test process uses at
        // least a few pages of memory).
        if let Some(bytes) = sample_rss_bytes() {
            assert!(bytes > 0);
        }
    }
}

//! Monotonic timestamping.
//!
//! [`now_nanos`] is the timestamp source for session start/stop, query
//! timing, and journal entries. On x86-64 it can use a calibrated RDTSC read
//! instead of a syscall; calibration is one-time, thread-safe, and falls
//! back silently (never fails the caller) if the measured TSC frequency
//! looks implausible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Calibration state: 0 = not yet run, 1 = running, 2 = done.
static CALIBRATION_STATE: AtomicU64 = AtomicU64::new(0);
/// Measured TSC ticks per nanosecond, stored as a fixed-point value scaled
/// by 2^32 so it can be an atomic integer. Zero means "use the fallback
/// clock."
static TSC_TICKS_PER_NANO_Q32: AtomicU64 = AtomicU64::new(0);

const CALIBRATION_NOT_STARTED: u64 = 0;
const CALIBRATION_IN_PROGRESS: u64 = 1;
const CALIBRATION_DONE: u64 = 2;

const CALIBRATION_SLEEP: std::time::Duration = std::time::Duration::from_millis(2);

/// Returns a monotonic timestamp in nanoseconds since an arbitrary, fixed
/// per-process origin. Not comparable across processes.
#[must_use]
pub fn now_nanos() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        ensure_calibrated();
        let q32 = TSC_TICKS_PER_NANO_Q32.load(Ordering::Relaxed);
        if q32 != 0 {
            // SAFETY: `rdtsc` has no preconditions; it reads a CPU counter.
            let ticks = unsafe { core::arch::x86_64::_rdtsc() };
            // ticks / (ticks_per_nano) == ticks * 2^32 / q32, done in u128 to
            // avoid overflow across the full tick range.
            let nanos = (u128::from(ticks) << 32) / u128::from(q32);
            return nanos as u64;
        }
    }
    fallback_now_nanos()
}

fn fallback_now_nanos() -> u64 {
    static ORIGIN: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_nanos() as u64
}

#[cfg(target_arch = "x86_64")]
fn ensure_calibrated() {
    if TSC_TICKS_PER_NANO_Q32.load(Ordering::Acquire) != 0
        || CALIBRATION_STATE.load(Ordering::Acquire) == CALIBRATION_DONE
    {
        return;
    }
    if CALIBRATION_STATE
        .compare_exchange(
            CALIBRATION_NOT_STARTED,
            CALIBRATION_IN_PROGRESS,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        // Another thread is calibrating (or already finished); callers fall
        // back to the syscall clock for this call, which is always correct.
        return;
    }

    let wall_start = Instant::now();
    // SAFETY: `rdtsc` has no preconditions.
    let tsc_start = unsafe { core::arch::x86_64::_rdtsc() };
    std::thread::sleep(CALIBRATION_SLEEP);
    let tsc_end = unsafe { core::arch::x86_64::_rdtsc() };
    let wall_elapsed = wall_start.elapsed();

    let tick_delta = tsc_end.saturating_sub(tsc_start);
    let nanos_elapsed = wall_elapsed.as_nanos();

    // A plausible modern CPU runs at 0.5-10 GHz. Reject anything outside a
    // generous band rather than trust a clearly broken measurement (e.g. a
    // virtualized TSC that doesn't advance, or a preempted sleep).
    let plausible = nanos_elapsed > 0 && {
        let ticks_per_nano_q32 = (u128::from(tick_delta) << 32) / nanos_elapsed.max(1);
        let ghz_q32 = ticks_per_nano_q32; // ticks/nanosecond == GHz, already in the right units
        let min_q32 = (1u128 << 32) / 2; // 0.5 GHz
        let max_q32 = (1u128 << 32) * 10; // 10 GHz
        ghz_q32 >= min_q32 && ghz_q32 <= max_q32
    };

    let q32 = if plausible {
        ((u128::from(tick_delta) << 32) / nanos_elapsed.max(1)) as u64
    } else {
        0
    };
    TSC_TICKS_PER_NANO_Q32.store(q32, Ordering::Release);
    CALIBRATION_STATE.store(CALIBRATION_DONE, Ordering::Release);
}

/// Converts nanoseconds to milliseconds as a lossy double, intentionally:
/// metrics are reported to the host as `f64` milliseconds.
#[must_use]
pub fn nanos_to_millis_f64(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}

/// Converts a millisecond `f64` back to nanoseconds, intentionally lossy.
#[must_use]
pub fn millis_f64_to_nanos(millis: f64) -> u64 {
    if millis <= 0.0 {
        return 0;
    }
    (millis * 1_000_000.0) as u64
}

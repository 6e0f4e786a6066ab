//! Test-context object pool (C4).
//!
//! Unlike session handles, context identity is the slot's address itself:
//! the pool is a fixed array living for the process lifetime, so a
//! `&'static TestContext` is as stable a handle as a generation-tagged
//! index would be, and `finalize` never frees slot memory. Slot reuse
//! safety comes entirely from the `active` flag — a stale reference to an
//! already-finalized (or never-created) slot is simply inactive, and every
//! mutating operation checks that flag before touching fields.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::error::CoreError;
use crate::primitives::time::now_nanos;

/// Fixed context-pool capacity.
pub const N_CONTEXTS: usize = 256;
const MAX_CLASS_LEN: usize = 127;
const MAX_METHOD_LEN: usize = 127;
const MAX_SIGNATURE_LEN: usize = 255;
const MAX_GRADE_LEN: usize = 3;

fn truncate_owned(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// One slot in the fixed-size test-context pool.
pub struct TestContext {
    active: AtomicBool,
    class_name: Mutex<String>,
    method_name: Mutex<String>,
    start_ns: AtomicU64,
    end_ns: AtomicU64,
    elapsed_ms_bits: AtomicU64,
    memory_mb_bits: AtomicU64,
    query_count: AtomicU32,
    cache_ratio_bits: AtomicU64,
    score_bits: AtomicU64,
    grade: Mutex<String>,
    n_plus_one_present: AtomicBool,
    n_plus_one_severity: AtomicU8,
    n_plus_one_signature: Mutex<String>,
}

impl TestContext {
    const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            class_name: Mutex::new(String::new()),
            method_name: Mutex::new(String::new()),
            start_ns: AtomicU64::new(0),
            end_ns: AtomicU64::new(0),
            elapsed_ms_bits: AtomicU64::new(0),
            memory_mb_bits: AtomicU64::new(0),
            query_count: AtomicU32::new(0),
            cache_ratio_bits: AtomicU64::new(0),
            score_bits: AtomicU64::new(0),
            grade: Mutex::new(String::new()),
            n_plus_one_present: AtomicBool::new(false),
            n_plus_one_severity: AtomicU8::new(0),
            n_plus_one_signature: Mutex::new(String::new()),
        }
    }

    #[must_use]
    pub fn class_name(&self) -> String {
        self.class_name.lock().clone()
    }

    #[must_use]
    pub fn method_name(&self) -> String {
        self.method_name.lock().clone()
    }

    #[must_use]
    pub fn start_ns(&self) -> u64 {
        self.start_ns.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn query_count(&self) -> u32 {
        self.query_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        f64::from_bits(self.elapsed_ms_bits.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn memory_mb(&self) -> f64 {
        f64::from_bits(self.memory_mb_bits.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn cache_ratio(&self) -> f64 {
        f64::from_bits(self.cache_ratio_bits.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        f64::from_bits(self.score_bits.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn grade(&self) -> String {
        self.grade.lock().clone()
    }

    #[must_use]
    pub fn n_plus_one_present(&self) -> bool {
        self.n_plus_one_present.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn n_plus_one_severity(&self) -> u8 {
        self.n_plus_one_severity.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

const CONTEXT_INIT: TestContext = TestContext::new();
static CONTEXTS: [TestContext; N_CONTEXTS] = [CONTEXT_INIT; N_CONTEXTS];

static TOTAL_TESTS: AtomicU64 = AtomicU64::new(0);
static TOTAL_VIOLATIONS: AtomicU64 = AtomicU64::new(0);
static TOTAL_N_PLUS_ONE: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONTEXTS: AtomicU64 = AtomicU64::new(0);

/// Severity at or above which a finalized N+1 detection counts as a
/// "violation" in [`crate::orchestrator::OrchestratorStatistics`].
const VIOLATION_SEVERITY_THRESHOLD: u8 = 4;

/// Claims a free context slot via CAS on its active flag. `None` on empty
/// names or pool exhaustion.
#[must_use]
pub fn create_test_context(class: &str, method: &str) -> Option<&'static TestContext> {
    if class.is_empty() || method.is_empty() {
        return None;
    }
    for ctx in &CONTEXTS {
        if ctx
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            *ctx.class_name.lock() = truncate_owned(class, MAX_CLASS_LEN);
            *ctx.method_name.lock() = truncate_owned(method, MAX_METHOD_LEN);
            ctx.start_ns.store(now_nanos(), Ordering::Release);
            ctx.end_ns.store(0, Ordering::Release);
            ctx.elapsed_ms_bits.store(0, Ordering::Release);
            ctx.memory_mb_bits.store(0, Ordering::Release);
            ctx.query_count.store(0, Ordering::Release);
            ctx.cache_ratio_bits.store(0, Ordering::Release);
            ctx.score_bits.store(0, Ordering::Release);
            *ctx.grade.lock() = String::new();
            ctx.n_plus_one_present.store(false, Ordering::Release);
            ctx.n_plus_one_severity.store(0, Ordering::Release);
            *ctx.n_plus_one_signature.lock() = String::new();

            TOTAL_TESTS.fetch_add(1, Ordering::Relaxed);
            ACTIVE_CONTEXTS.fetch_add(1, Ordering::Relaxed);
            return Some(ctx);
        }
    }
    None
}

/// Stores the per-test metrics gathered since creation. `cache_ratio` is
/// clamped to `[0, 1]`; `elapsed_ms`/`memory_mb`/`score` are stored
/// bit-exact, including NaN/Inf.
pub fn update_test_context(
    ctx: &TestContext,
    elapsed_ms: f64,
    memory_mb: f64,
    query_count: u32,
    cache_ratio: f64,
    score: f64,
    grade: &str,
) -> Result<(), CoreError> {
    if !ctx.is_active() {
        return Err(CoreError::not_found().with_context("update on inactive test context"));
    }
    ctx.elapsed_ms_bits.store(elapsed_ms.to_bits(), Ordering::Release);
    ctx.memory_mb_bits.store(memory_mb.to_bits(), Ordering::Release);
    ctx.query_count.store(query_count, Ordering::Release);
    ctx.cache_ratio_bits
        .store(cache_ratio.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    ctx.score_bits.store(score.to_bits(), Ordering::Release);
    *ctx.grade.lock() = truncate_owned(grade, MAX_GRADE_LEN);
    Ok(())
}

/// Records the N+1 detection result for this test. `signature` is
/// truncated to 255 bytes; `None` is stored as an empty string.
pub fn update_n_plus_one_analysis(
    ctx: &TestContext,
    present: bool,
    severity: u8,
    signature: Option<&str>,
) -> Result<(), CoreError> {
    if !ctx.is_active() {
        return Err(CoreError::not_found().with_context("N+1 update on inactive test context"));
    }
    ctx.n_plus_one_present.store(present, Ordering::Release);
    ctx.n_plus_one_severity.store(severity, Ordering::Release);
    *ctx.n_plus_one_signature.lock() = truncate_owned(signature.unwrap_or(""), MAX_SIGNATURE_LEN);
    Ok(())
}

/// Snapshot handed to the journal on finalize.
pub struct FinalizedContext {
    pub class_name: String,
    pub method_name: String,
    pub end_ns: u64,
    pub elapsed_ms: f64,
    pub memory_mb: f64,
    pub query_count: u32,
    pub cache_ratio: f64,
    pub score: f64,
    pub grade: String,
    pub n_plus_one_present: bool,
    pub n_plus_one_severity: u8,
}

/// Stamps the end timestamp, snapshots the context, and clears the active
/// flag. A second finalize on the same slot fails (it is already
/// inactive). Slot memory is never freed; it becomes claimable again by a
/// future `create_test_context`.
pub fn finalize_test_context(ctx: &TestContext) -> Result<FinalizedContext, CoreError> {
    if !ctx.is_active() {
        return Err(CoreError::not_found().with_context("double finalize of test context"));
    }
    let end_ns = now_nanos();
    ctx.end_ns.store(end_ns, Ordering::Release);

    let severity = ctx.n_plus_one_severity();
    let present = ctx.n_plus_one_present();
    let snapshot = FinalizedContext {
        class_name: ctx.class_name(),
        method_name: ctx.method_name(),
        end_ns,
        elapsed_ms: ctx.elapsed_ms(),
        memory_mb: ctx.memory_mb(),
        query_count: ctx.query_count(),
        cache_ratio: ctx.cache_ratio(),
        score: ctx.score(),
        grade: ctx.grade(),
        n_plus_one_present: present,
        n_plus_one_severity: severity,
    };

    if present && severity >= VIOLATION_SEVERITY_THRESHOLD {
        TOTAL_VIOLATIONS.fetch_add(1, Ordering::Relaxed);
    }
    if present {
        TOTAL_N_PLUS_ONE.fetch_add(1, Ordering::Relaxed);
    }

    // Publish the snapshot (journal append happens in the caller, using
    // this return value) before the slot goes back up for grabs.
    ctx.active.store(false, Ordering::Release);
    ACTIVE_CONTEXTS.fetch_sub(1, Ordering::Relaxed);

    Ok(snapshot)
}

/// Atomic snapshot of the pool/journal counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatistics {
    pub total_tests: u64,
    pub total_violations: u64,
    pub total_n_plus_one: u64,
    pub active_contexts: u64,
}

#[must_use]
pub fn pool_statistics() -> PoolStatistics {
    PoolStatistics {
        total_tests: TOTAL_TESTS.load(Ordering::Relaxed),
        total_violations: TOTAL_VIOLATIONS.load(Ordering::Relaxed),
        total_n_plus_one: TOTAL_N_PLUS_ONE.load(Ordering::Relaxed),
        active_contexts: ACTIVE_CONTEXTS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_update_finalize_round_trip() {
        let ctx = create_test_context("com.example.Foo", "testBar").unwrap();
        update_test_context(ctx, 12.0, 4.0, 3, 1.5, 95.0, "A+++").unwrap();
        assert!((ctx.cache_ratio() - 1.0).abs() < f64::EPSILON);
        assert_eq!(ctx.grade(), "A++");

        update_n_plus_one_analysis(ctx, true, 4, Some("SELECT * FROM x")).unwrap();
        assert!(ctx.n_plus_one_present());

        let finalized = finalize_test_context(ctx).unwrap();
        assert_eq!(finalized.class_name, "com.example.Foo");
        assert!(finalized.n_plus_one_present);
        assert_eq!(finalized.n_plus_one_severity, 4);
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(create_test_context("", "method").is_none());
        assert!(create_test_context("Class", "").is_none());
    }

    #[test]
    fn double_finalize_fails() {
        let ctx = create_test_context("DoubleFinalize", "run").unwrap();
        finalize_test_context(ctx).unwrap();
        assert!(finalize_test_context(ctx).is_err());
    }

    #[test]
    fn update_after_finalize_fails() {
        let ctx = create_test_context("UpdateAfterFinalize", "run").unwrap();
        finalize_test_context(ctx).unwrap();
        assert!(update_test_context(ctx, 1.0, 1.0, 1, 0.5, 1.0, "A").is_err());
    }

    #[test]
    fn cache_ratio_is_clamped() {
        let ctx = create_test_context("ClampTest", "run").unwrap();
        update_test_context(ctx, 1.0, 1.0, 1, 5.0, 1.0, "A").unwrap();
        assert!((ctx.cache_ratio() - 1.0).abs() < f64::EPSILON);
        update_test_context(ctx, 1.0, 1.0, 1, -5.0, 1.0, "A").unwrap();
        assert!(ctx.cache_ratio().abs() < f64::EPSILON);
        finalize_test_context(ctx).unwrap();
    }

    #[test]
    fn nan_elapsed_is_stored_bit_exact() {
        let ctx = create_test_context("NanTest", "run").unwrap();
        update_test_context(ctx, f64::NAN, 1.0, 1, 0.5, 1.0, "A").unwrap();
        assert!(ctx.elapsed_ms().is_nan());
        finalize_test_context(ctx).unwrap();
    }
}

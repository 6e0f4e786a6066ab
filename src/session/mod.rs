//! Session engine (C2): a fixed-capacity table of in-flight measurement
//! windows, thread-local "current session" binding, and the derived
//! [`Metrics`] record produced by [`stop`].
//!
//! Handles are generation-tagged slot indices, not raw pointers: a handle
//! from a freed slot can never be mistaken for a handle into whatever
//! session later reuses that slot, because the slot's generation counter
//! only moves forward and is baked into the handle at allocation time.

pub mod memory;
pub mod severity;

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::CoreError;
use crate::primitives::time::{nanos_to_millis_f64, now_nanos};

/// Fixed session-slot table size.
pub const N_SLOTS: usize = 2048;
const SLOT_INDEX_BITS: u32 = 11; // 2^11 == N_SLOTS

const DEFAULT_OPERATION_KIND: &str = "general";
const MAX_OPERATION_NAME_LEN: usize = 255;
const MAX_OPERATION_KIND_LEN: usize = 63;

/// Sentinel stored in place of a failed memory sample.
const MEMORY_SAMPLE_FAILED: i64 = -1;

struct SlotNames {
    operation_name: String,
    operation_kind: String,
}

struct Slot {
    active: AtomicBool,
    generation: AtomicU32,
    names: Mutex<SlotNames>,
    start_ns: AtomicU64,
    end_ns: AtomicU64,
    start_mem_bytes: AtomicI64,
    end_mem_bytes: AtomicI64,
    query_count: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Slot {
    const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            // Generations start at 1 so the very first handle issued for
            // slot 0 is non-zero, matching the ">= 1 when valid" contract.
            generation: AtomicU32::new(1),
            names: Mutex::new(SlotNames {
                operation_name: String::new(),
                operation_kind: String::new(),
            }),
            start_ns: AtomicU64::new(0),
            end_ns: AtomicU64::new(0),
            start_mem_bytes: AtomicI64::new(0),
            end_mem_bytes: AtomicI64::new(0),
            query_count: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const SLOT_INIT: Slot = Slot::new();
static SLOTS: [Slot; N_SLOTS] = [SLOT_INIT; N_SLOTS];

thread_local! {
    static CURRENT_SESSION: Cell<i64> = const { Cell::new(0) };
}

fn encode_handle(slot_index: usize, generation: u32) -> i64 {
    (i64::from(generation) << SLOT_INDEX_BITS) | slot_index as i64
}

fn decode_handle(handle: i64) -> Option<(usize, u32)> {
    if handle <= 0 {
        return None;
    }
    let slot_index = (handle & ((1i64 << SLOT_INDEX_BITS) - 1)) as usize;
    let generation = (handle >> SLOT_INDEX_BITS) as u32;
    if slot_index >= N_SLOTS {
        return None;
    }
    Some((slot_index, generation))
}

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

fn sampled_memory_bytes() -> i64 {
    memory::sample_rss_bytes()
        .and_then(|b| i64::try_from(b).ok())
        .unwrap_or(MEMORY_SAMPLE_FAILED)
}

/// Starts a measurement window. `kind` defaults to `"general"` when `None`.
/// Binds the returned handle as this thread's current session.
///
/// # Errors
/// [`crate::error::CoreErrorKind::InvalidArgument`] if `operation_name` is
/// empty. [`crate::error::CoreErrorKind::ResourceExhausted`] if every slot
/// is occupied.
pub fn start(operation_name: &str, operation_kind: Option<&str>) -> Result<i64, CoreError> {
    if operation_name.is_empty() {
        return Err(CoreError::invalid_argument().with_context("operation_name must be non-empty"));
    }
    let kind = operation_kind.filter(|k| !k.is_empty()).unwrap_or(DEFAULT_OPERATION_KIND);

    for (index, slot) in SLOTS.iter().enumerate() {
        if slot
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            {
                let mut names = slot.names.lock();
                names.operation_name = truncate_owned(operation_name, MAX_OPERATION_NAME_LEN);
                names.operation_kind = truncate_owned(kind, MAX_OPERATION_KIND_LEN);
            }
            let start_mem = sampled_memory_bytes();
            slot.start_mem_bytes.store(start_mem, Ordering::Relaxed);
            slot.end_mem_bytes.store(start_mem, Ordering::Relaxed);
            slot.query_count.store(0, Ordering::Relaxed);
            slot.cache_hits.store(0, Ordering::Relaxed);
            slot.cache_misses.store(0, Ordering::Relaxed);
            slot.start_ns.store(now_nanos(), Ordering::Relaxed);
            slot.end_ns.store(0, Ordering::Relaxed);

            let generation = slot.generation.load(Ordering::Acquire);
            let handle = encode_handle(index, generation);
            CURRENT_SESSION.with(|c| c.set(handle));
            return Ok(handle);
        }
    }
    Err(CoreError::resource_exhausted().with_context("all session slots occupied"))
}

/// A snapshot of one completed session, owned by the caller.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub operation_name: String,
    pub operation_kind: String,
    pub start_ns: u64,
    pub end_ns: u64,
    pub start_mem_bytes: i64,
    pub end_mem_bytes: i64,
    pub query_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl Metrics {
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        nanos_to_millis_f64(self.end_ns.saturating_sub(self.start_ns))
    }

    #[must_use]
    pub fn memory_usage_mb(&self) -> f64 {
        if self.end_mem_bytes < 0 {
            return -1.0;
        }
        self.end_mem_bytes as f64 / (1024.0 * 1024.0)
    }

    #[must_use]
    pub fn memory_delta_mb(&self) -> f64 {
        if self.start_mem_bytes < 0 || self.end_mem_bytes < 0 {
            return -1.0;
        }
        (self.end_mem_bytes - self.start_mem_bytes) as f64 / (1024.0 * 1024.0)
    }

    #[must_use]
    pub const fn query_count(&self) -> u64 {
        self.query_count
    }

    #[must_use]
    pub const fn cache_hit_count(&self) -> u64 {
        self.cache_hits
    }

    #[must_use]
    pub const fn cache_miss_count(&self) -> u64 {
        self.cache_misses
    }

    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    #[must_use]
    pub fn has_n_plus_one_pattern(&self) -> bool {
        severity::has_n_plus_one_pattern(self.query_count)
    }

    #[must_use]
    pub fn calculate_n_plus_one_severity(&self) -> u8 {
        severity::severity(self.query_count)
    }

    #[must_use]
    pub fn detect_n_plus_one_severe(&self) -> bool {
        self.calculate_n_plus_one_severity() >= 4
    }

    #[must_use]
    pub fn detect_n_plus_one_moderate(&self) -> bool {
        self.calculate_n_plus_one_severity() == 2
    }

    #[must_use]
    pub fn detect_n_plus_one_pattern_by_count(&self) -> bool {
        self.has_n_plus_one_pattern()
    }

    #[must_use]
    pub fn estimate_n_plus_one_cause(&self) -> u8 {
        severity::estimate_cause(self.query_count, self.elapsed_ms())
    }

    #[must_use]
    pub fn get_n_plus_one_fix_suggestion(&self) -> &'static str {
        severity::fix_suggestion(self.estimate_n_plus_one_cause())
    }
}

/// Ends a measurement window and returns an owned snapshot.
///
/// # Errors
/// [`crate::error::CoreErrorKind::Stale`] if `handle` is malformed, already
/// stopped, or from a generation that no longer occupies its slot.
pub fn stop(handle: i64) -> Result<Metrics, CoreError> {
    let (index, generation) = decode_handle(handle)
        .ok_or_else(|| CoreError::stale().with_context("malformed handle"))?;
    let slot = &SLOTS[index];

    if !slot.active.load(Ordering::Acquire) || slot.generation.load(Ordering::Acquire) != generation {
        return Err(CoreError::stale().with_context("handle does not address a live session"));
    }

    slot.end_ns.store(now_nanos(), Ordering::Relaxed);
    let end_mem = sampled_memory_bytes();
    slot.end_mem_bytes.store(end_mem, Ordering::Relaxed);

    // Re-check after recording end state: another thread racing a second
    // stop() on the same handle must not both succeed.
    if slot.generation.load(Ordering::Acquire) != generation {
        return Err(CoreError::stale().with_context("handle does not address a live session"));
    }

    let (operation_name, operation_kind) = {
        let names = slot.names.lock();
        (names.operation_name.clone(), names.operation_kind.clone())
    };
    let metrics = Metrics {
        operation_name,
        operation_kind,
        start_ns: slot.start_ns.load(Ordering::Relaxed),
        end_ns: slot.end_ns.load(Ordering::Relaxed),
        start_mem_bytes: slot.start_mem_bytes.load(Ordering::Relaxed),
        end_mem_bytes: end_mem,
        query_count: slot.query_count.load(Ordering::Acquire),
        cache_hits: slot.cache_hits.load(Ordering::Acquire),
        cache_misses: slot.cache_misses.load(Ordering::Acquire),
    };

    // This is the only writer allowed to transition this slot from active
    // to free, guarded by the generation re-check above; bumping the
    // generation before clearing `active` ensures a concurrent `start`
    // that claims this slot next gets a handle the old one can't collide
    // with.
    slot.generation.fetch_add(1, Ordering::AcqRel);
    slot.active.store(false, Ordering::Release);

    CURRENT_SESSION.with(|c| {
        if c.get() == handle {
            c.set(0);
        }
    });

    Ok(metrics)
}

fn with_current_slot<F: FnOnce(&Slot)>(f: F) {
    let handle = CURRENT_SESSION.with(Cell::get);
    let Some((index, generation)) = decode_handle(handle) else {
        return;
    };
    let slot = &SLOTS[index];
    if slot.active.load(Ordering::Acquire) && slot.generation.load(Ordering::Acquire) == generation {
        f(slot);
    }
}

/// No-op if the calling thread has no bound session.
pub fn increment_query_count() {
    with_current_slot(|slot| {
        slot.query_count.fetch_add(1, Ordering::AcqRel);
    });
}

/// No-op if the calling thread has no bound session.
pub fn increment_cache_hits() {
    with_current_slot(|slot| {
        slot.cache_hits.fetch_add(1, Ordering::AcqRel);
    });
}

/// No-op if the calling thread has no bound session.
pub fn increment_cache_misses() {
    with_current_slot(|slot| {
        slot.cache_misses.fetch_add(1, Ordering::AcqRel);
    });
}

/// Zeros the calling thread's bound session's query/cache-hit/cache-miss
/// counters. No-op if the calling thread has no bound session.
pub fn reset_global_counters() {
    with_current_slot(|slot| {
        slot.query_count.store(0, Ordering::Release);
        slot.cache_hits.store(0, Ordering::Release);
        slot.cache_misses.store(0, Ordering::Release);
    });
}

/// Sets this thread's current session to `handle`, without validating it.
pub fn set_current_session_id(handle: i64) {
    CURRENT_SESSION.with(|c| c.set(handle));
}

/// Returns this thread's current session handle, or 0 if unset.
#[must_use]
pub fn get_current_session_id() -> i64 {
    CURRENT_SESSION.with(Cell::get)
}

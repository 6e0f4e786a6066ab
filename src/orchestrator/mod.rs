//! Test orchestrator (C4): a fixed context pool backed by a memory-mapped
//! history journal. Context creation/finalization are lock-free CAS
//! operations on per-slot flags (see [`context`]); the journal serializes
//! growth behind a mutex but appends are otherwise independent of it (see
//! [`journal`]).

pub mod context;
pub mod journal;

use std::path::PathBuf;
use std::sync::OnceLock;

use context::{FinalizedContext, PoolStatistics};
use journal::{HistoryEntry, Journal};

pub use context::{
    create_test_context, finalize_test_context, update_n_plus_one_analysis, update_test_context,
    TestContext,
};

const HISTORY_PATH_ENV: &str = "MERCURY_HISTORY_PATH";
const DEFAULT_HISTORY_PATH: &str = "mercury_history.journal";

static JOURNAL: OnceLock<Journal> = OnceLock::new();

fn journal_path() -> PathBuf {
    std::env::var_os(HISTORY_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_HISTORY_PATH), PathBuf::from)
}

fn journal() -> Option<&'static Journal> {
    if let Some(journal) = JOURNAL.get() {
        return Some(journal);
    }
    match Journal::open(&journal_path()) {
        Ok(journal) => Some(JOURNAL.get_or_init(|| journal)),
        Err(err) => {
            crate::error::set_error_from(&err);
            None
        }
    }
}

fn to_history_entry(finalized: &FinalizedContext) -> HistoryEntry {
    HistoryEntry {
        timestamp_ns: finalized.end_ns,
        class_name: finalized.class_name.clone(),
        method_name: finalized.method_name.clone(),
        elapsed_ms: finalized.elapsed_ms,
        memory_mb: finalized.memory_mb,
        query_count: finalized.query_count,
        cache_ratio: finalized.cache_ratio,
        score: finalized.score,
        grade: finalized.grade.clone(),
        n_plus_one: finalized.n_plus_one_present,
        severity: finalized.n_plus_one_severity,
    }
}

/// Finalizes `ctx` and publishes the resulting record to the history
/// journal before the slot is released. The journal publish happens
/// before the active flag clears (matching the orchestrator's stated
/// ordering guarantee), even though both happen inside this one call.
pub fn finalize_and_record(ctx: &'static TestContext) -> Result<(), crate::error::CoreError> {
    let finalized = finalize_test_context(ctx)?;
    if let Some(journal) = journal() {
        let entry = to_history_entry(&finalized);
        journal.append(&entry)?;
    }
    Ok(())
}

/// Combined pool + journal statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorStatistics {
    pub total_tests: u64,
    pub total_violations: u64,
    pub total_n_plus_one: u64,
    pub active_contexts: u64,
    pub history_entries: u64,
}

#[must_use]
pub fn orchestrator_statistics() -> OrchestratorStatistics {
    let PoolStatistics {
        total_tests,
        total_violations,
        total_n_plus_one,
        active_contexts,
    } = context::pool_statistics();
    let history_entries = journal().map_or(0, Journal::entry_count);
    OrchestratorStatistics {
        total_tests,
        total_violations,
        total_n_plus_one,
        active_contexts,
        history_entries,
    }
}

/// Formats one line per journal entry whose class/method contain the
/// respective filters (`None`/empty means "any") and whose timestamp
/// falls in `[start_ts, end_ts]`. Matches insertion order.
#[must_use]
pub fn query_history_entries(
    class_filter: Option<&str>,
    method_filter: Option<&str>,
    start_ts: u64,
    end_ts: u64,
) -> String {
    let Some(journal) = journal() else {
        return String::new();
    };
    let class_filter = class_filter.unwrap_or("");
    let method_filter = method_filter.unwrap_or("");

    let mut out = String::new();
    for entry in journal.entries() {
        if entry.timestamp_ns < start_ts || entry.timestamp_ns > end_ts {
            continue;
        }
        if !class_filter.is_empty() && !entry.class_name.contains(class_filter) {
            continue;
        }
        if !method_filter.is_empty() && !entry.method_name.contains(method_filter) {
            continue;
        }
        out.push_str(&format!(
            "{} {}::{} elapsed={:.2}ms memory={:.2}MB queries={} cache_ratio={:.2} score={:.2} grade={} n_plus_one={} severity={}\n",
            entry.timestamp_ns,
            entry.class_name,
            entry.method_name,
            entry.elapsed_ms,
            entry.memory_mb,
            entry.query_count,
            entry.cache_ratio,
            entry.score,
            entry.grade,
            entry.n_plus_one,
            entry.severity,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_reflect_create_and_finalize() {
        let before = orchestrator_statistics();
        let ctx = create_test_context("OrchestratorStatsTest", "run").unwrap();
        update_test_context(ctx, 5.0, 1.0, 1, 0.9, 90.0, "A").unwrap();
        let mid = orchestrator_statistics();
        assert_eq!(mid.active_contexts, before.active_contexts + 1);
        assert_eq!(mid.total_tests, before.total_tests + 1);

        finalize_and_record(ctx).unwrap();
        let after = orchestrator_statistics();
        assert_eq!(after.active_contexts, before.active_contexts);
    }

    #[test]
    fn query_filters_by_class_and_method() {
        let ctx = create_test_context("QueryFilterClass", "queryFilterMethod").unwrap();
        update_test_context(ctx, 1.0, 1.0, 1, 1.0, 100.0, "A").unwrap();
        finalize_and_record(ctx).unwrap();

        let report = query_history_entries(Some("QueryFilterClass"), None, 0, u64::MAX);
        assert!(report.contains("QueryFilterClass"));

        let miss = query_history_entries(Some("DefinitelyNotPresentXYZ"), None, 0, u64::MAX);
        assert!(!miss.contains("QueryFilterClass"));
    }
}

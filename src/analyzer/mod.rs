//! Query analyzer (C3): normalizes and clusters query strings, classifies
//! duplicate-pattern severity, and estimates likely cause. All state lives
//! behind a single mutex; the analyzer is thread-safe but not reentrant —
//! callers must not call back into it from within a call.

pub mod normalize;

use parking_lot::Mutex;

use crate::primitives::hash::fnv1a64;
use crate::primitives::time::now_nanos;
use crate::session::severity;
use normalize::{classify_kind, normalize, QueryKind};

/// Fixed cluster-table capacity; insertion beyond this is rejected
/// (backpressure), not evicted.
pub const MAX_CLUSTERS: usize = 1024;
/// Minimum cluster occurrence count to qualify as an N+1 signal.
pub const DUP_THRESHOLD: u64 = 5;
const MAX_REPRESENTATIVE_LEN: usize = 255;

struct Cluster {
    fingerprint: u64,
    representative: String,
    count: u64,
    total_exec_time_ms: f64,
    first_seen_ns: u64,
    last_seen_ns: u64,
    kind: QueryKind,
}

struct AnalyzerState {
    clusters: Vec<Cluster>,
    total_query_count: u64,
    current_severity: u8,
    current_cause: u8,
    last_detected_count: u64,
}

/// Snapshot of the four analyzer statistics counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStatistics {
    pub total: u64,
    pub n_plus_one_detected: u64,
    pub similar: u64,
    pub active_clusters: u64,
}

impl AnalyzerState {
    const fn new() -> Self {
        Self {
            clusters: Vec::new(),
            total_query_count: 0,
            current_severity: 0,
            current_cause: 0,
            last_detected_count: 0,
        }
    }

    /// Normalizes `text`, clusters it by fingerprint, and updates cluster /
    /// global statistics.
    ///
    /// Returns `-1` if `text` is `None` (the "NULL" case at the ABI
    /// boundary). Empty/whitespace-only/comment-only input is accepted: it
    /// records a statistic but creates no cluster. Returns `0` on every
    /// other path, including a full cluster table (still counted
    /// globally).
    fn analyze_query(&mut self, text: Option<&str>, execution_time_ms: f64) -> i32 {
        let Some(text) = text else { return -1 };
        let normalized = normalize(text);

        self.total_query_count += 1;

        if normalized.is_empty() {
            return 0;
        }

        let fingerprint = fnv1a64(normalized.as_bytes());
        let now = now_nanos();

        if let Some(cluster) = self.clusters.iter_mut().find(|c| c.fingerprint == fingerprint) {
            cluster.count += 1;
            cluster.total_exec_time_ms += execution_time_ms;
            cluster.last_seen_ns = now;
            return 0;
        }

        if self.clusters.len() < MAX_CLUSTERS {
            let kind = classify_kind(&normalized);
            self.clusters.push(Cluster {
                fingerprint,
                representative: truncate_to(&normalized, MAX_REPRESENTATIVE_LEN),
                count: 1,
                total_exec_time_ms: execution_time_ms,
                first_seen_ns: now,
                last_seen_ns: now,
                kind,
            });
        }
        // Table full: global count above already recorded the observation;
        // no cluster is created, but this is still a successful call.
        0
    }

    /// Rescans clusters, recomputing the cached severity/cause and
    /// counting clusters whose count has reached [`DUP_THRESHOLD`].
    /// Returns that count.
    fn detect_n_plus_one_patterns(&mut self) -> i32 {
        let qualifying = self
            .clusters
            .iter()
            .filter(|c| c.count >= DUP_THRESHOLD)
            .count();

        let top_cluster_count = self.clusters.iter().map(|c| c.count).max().unwrap_or(0);
        let driving_count = top_cluster_count.max(self.total_query_count);

        let driving_time_ms = if top_cluster_count >= self.total_query_count {
            self.clusters
                .iter()
                .find(|c| c.count == top_cluster_count)
                .map_or(0.0, |c| c.total_exec_time_ms)
        } else {
            self.clusters.iter().map(|c| c.total_exec_time_ms).sum()
        };

        self.current_severity = severity::severity(driving_count);
        self.current_cause = severity::estimate_cause(driving_count, driving_time_ms);
        self.last_detected_count = qualifying as u64;

        qualifying as i32
    }

    /// Formats a duplicate-query report: one line per cluster with count
    /// >= 2, each naming the representative, its occurrence count, and an
    /// execution-time summary. Clusters are reported in insertion order.
    fn duplicate_queries_report(&self) -> String {
        let mut report = String::new();
        for cluster in self.clusters.iter().filter(|c| c.count >= 2) {
            let avg_ms = cluster.total_exec_time_ms / cluster.count as f64;
            report.push_str(&format!(
                "{} [{}]: {} queries, total {:.2}ms, avg {:.2}ms\n",
                cluster.representative,
                cluster.kind.as_str(),
                cluster.count,
                cluster.total_exec_time_ms,
                avg_ms,
            ));
        }
        report
    }

    /// Returns the current statistics snapshot. `similar` is the total
    /// number of duplicate occurrences across all clusters (`count - 1`
    /// summed), and `n_plus_one_detected` is the qualifying-cluster count
    /// from the last [`Self::detect_n_plus_one_patterns`] call.
    fn query_statistics(&self) -> QueryStatistics {
        let similar: u64 = self.clusters.iter().map(|c| c.count.saturating_sub(1)).sum();
        QueryStatistics {
            total: self.total_query_count,
            n_plus_one_detected: self.last_detected_count,
            similar,
            active_clusters: self.clusters.len() as u64,
        }
    }

    /// Zeros every cluster and counter.
    fn reset(&mut self) {
        self.clusters.clear();
        self.total_query_count = 0;
        self.current_severity = 0;
        self.current_cause = 0;
        self.last_detected_count = 0;
    }
}

static STATE: Mutex<AnalyzerState> = Mutex::new(AnalyzerState::new());

fn truncate_to(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// See [`AnalyzerState::analyze_query`].
pub fn analyze_query(text: Option<&str>, execution_time_ms: f64) -> i32 {
    STATE.lock().analyze_query(text, execution_time_ms)
}

/// See [`AnalyzerState::detect_n_plus_one_patterns`].
pub fn detect_n_plus_one_patterns() -> i32 {
    STATE.lock().detect_n_plus_one_patterns()
}

/// Last severity computed by [`detect_n_plus_one_patterns`] (0 if it has
/// never run since construction/reset).
#[must_use]
pub fn get_n_plus_one_severity() -> u8 {
    STATE.lock().current_severity
}

/// Last cause computed by [`detect_n_plus_one_patterns`].
#[must_use]
pub fn get_n_plus_one_cause() -> u8 {
    STATE.lock().current_cause
}

/// Stable fix-suggestion text for the last computed cause.
#[must_use]
pub fn get_optimization_suggestion() -> &'static str {
    severity::fix_suggestion(STATE.lock().current_cause)
}

/// See [`AnalyzerState::duplicate_queries_report`].
#[must_use]
pub fn duplicate_queries_report() -> String {
    STATE.lock().duplicate_queries_report()
}

/// See [`AnalyzerState::query_statistics`].
#[must_use]
pub fn query_statistics() -> QueryStatistics {
    STATE.lock().query_statistics()
}

/// See [`AnalyzerState::reset`].
pub fn reset_query_analyzer() {
    STATE.lock().reset();
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests exercise a freshly-constructed `AnalyzerState` rather than the
    // process-global singleton, so they stay independent under the default
    // parallel test runner.

    #[test]
    fn null_text_is_rejected() {
        let mut state = AnalyzerState::new();
        assert_eq!(state.analyze_query(None, 1.0), -1);
    }

    #[test]
    fn duplicate_detection_scenario() {
        let mut state = AnalyzerState::new();
        for _ in 0..5 {
            assert_eq!(
                state.analyze_query(Some("SELECT * FROM users WHERE id = 1"), 1.0),
                0
            );
        }
        assert_eq!(
            state.analyze_query(Some("select   *   from   users   where id = 1"), 1.0),
            0
        );
        let stats = state.query_statistics();
        assert_eq!(stats.active_clusters, 1);
        assert_eq!(stats.total, 6);
    }

    #[test]
    fn whitespace_only_input_creates_no_cluster() {
        let mut state = AnalyzerState::new();
        assert_eq!(state.analyze_query(Some("   -- comment only\n  "), 1.0), 0);
        let stats = state.query_statistics();
        assert_eq!(stats.active_clusters, 0);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn reset_zeros_all_counters() {
        let mut state = AnalyzerState::new();
        state.analyze_query(Some("SELECT 1"), 1.0);
        state.detect_n_plus_one_patterns();
        state.reset();
        let stats = state.query_statistics();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.n_plus_one_detected, 0);
        assert_eq!(stats.similar, 0);
        assert_eq!(stats.active_clusters, 0);
        assert_eq!(state.current_severity, 0);
    }

    #[test]
    fn detect_counts_qualifying_clusters() {
        let mut state = AnalyzerState::new();
        for _ in 0..5 {
            state.analyze_query(Some("SELECT 1"), 1.0);
        }
        state.analyze_query(Some("SELECT 2"), 1.0);
        let qualifying = state.detect_n_plus_one_patterns();
        assert_eq!(qualifying, 1);
    }

    #[test]
    fn duplicate_queries_report_includes_count_suffix() {
        let mut state = AnalyzerState::new();
        for _ in 0..3 {
            state.analyze_query(Some("SELECT 1"), 2.0);
        }
        let report = state.duplicate_queries_report();
        assert!(report.contains("3 queries"));
    }

    #[test]
    fn full_cluster_table_still_counts_globally() {
        let mut state = AnalyzerState::new();
        for i in 0..MAX_CLUSTERS {
            state.analyze_query(Some(&format!("SELECT {i}")), 1.0);
        }
        let before = state.query_statistics();
        assert_eq!(before.active_clusters, MAX_CLUSTERS as u64);
        assert_eq!(state.analyze_query(Some("SELECT this_is_new"), 1.0), 0);
        let after = state.query_statistics();
        assert_eq!(after.active_clusters, MAX_CLUSTERS as u64);
        assert_eq!(after.total, before.total + 1);
    }

    #[test]
    fn global_singleton_entry_points_do_not_panic() {
        // A light smoke test of the process-global wrappers themselves,
        // tolerant of interleaving from other tests sharing the singleton.
        reset_query_analyzer();
        assert_eq!(analyze_query(Some("SELECT 1"), 1.0), 0);
        let _ = detect_n_plus_one_patterns();
        let _ = get_n_plus_one_severity();
        let _ = get_n_plus_one_cause();
        let _ = get_optimization_suggestion();
        let _ = duplicate_queries_report();
        let _ = query_statistics();
    }
}

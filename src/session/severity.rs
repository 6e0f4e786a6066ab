//! N+1 severity, cause, and fix-suggestion tables.
//!
//! Shared by the session engine's per-metrics classification and by the
//! query analyzer's cluster-driven classification, so the two pathways
//! cannot disagree about where the MODERATE/HIGH boundary falls. The HIGH
//! boundary is fixed at a query count of 12 (see the design notes on the
//! analyzer/performance-monitor boundary disagreement).

/// Classifies a query count into a severity of 0 (NONE) through 5
/// (CRITICAL). Monotonic non-decreasing in `query_count`.
#[must_use]
pub fn severity(query_count: u64) -> u8 {
    match query_count {
        0..=4 => 0,
        5..=11 => 1,
        12..=24 => 3,
        25..=49 => 4,
        _ => 5,
    }
}

/// True iff `severity(query_count) >= 1` and `query_count >= 12`: the
/// "paginated 1+N" guard that keeps MILD counts from raising the flag.
#[must_use]
pub fn has_n_plus_one_pattern(query_count: u64) -> bool {
    severity(query_count) >= 1 && query_count >= 12
}

/// Probable cause code, 0..4, from query count and total elapsed time
/// alone. `elapsed_ms` is the *total* elapsed time for the window, not a
/// per-query average; this function divides internally.
#[must_use]
pub fn estimate_cause(query_count: u64, elapsed_ms: f64) -> u8 {
    if severity(query_count) == 0 {
        return 0;
    }
    if query_count >= 50 {
        return 4;
    }
    if query_count >= 20 {
        let avg_ms = elapsed_ms / query_count as f64;
        return if avg_ms < 5.0 { 1 } else { 3 };
    }
    if query_count >= 12 {
        return 2;
    }
    0
}

/// Stable fix-suggestion text keyed by cause code. Reproduced verbatim by
/// every implementation; the host renders it as-is.
#[must_use]
pub const fn fix_suggestion(cause: u8) -> &'static str {
    match cause {
        1 => "Serializer N+1: check serializer methods for per-item queries and add prefetch_related for related collections.",
        2 => "Missing select_related: add select_related for the foreign-key lookups issued in this window.",
        3 => "Foreign-key N+1: consider denormalizing the foreign key or issuing a single bulk fetch instead of one query per row.",
        4 => "Complex relationship N+1: consider a raw SQL query or redesigning the query pattern for this operation.",
        _ => "No N+1 pattern detected.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_monotonic_and_bounded() {
        let mut previous = 0u8;
        for q in 0..200u64 {
            let s = severity(q);
            assert!(s <= 5);
            assert!(s >= previous);
            previous = s;
        }
    }

    #[test]
    fn boundary_scenarios_from_spec() {
        assert_eq!(severity(0), 0);
        assert!(!has_n_plus_one_pattern(0));
        assert!(severity(12) >= 2);
        assert!(has_n_plus_one_pattern(12));
        assert_eq!(severity(20), 3);
        assert_eq!(severity(50), 5);
        assert_eq!(estimate_cause(50, 1000.0), 4);
    }

    #[test]
    fn has_pattern_false_below_12_true_at_or_above() {
        for q in 0..12u64 {
            assert!(!has_n_plus_one_pattern(q), "q={q}");
        }
        for q in 12..30u64 {
            assert!(has_n_plus_one_pattern(q), "q={q}");
        }
    }

    #[test]
    fn cause_for_twenty_queries_follows_average_time() {
        // total elapsed < 5ms * 20 = 100ms -> cause 1 (fast, serializer N+1).
        assert_eq!(estimate_cause(20, 99.0), 1);
        assert_eq!(estimate_cause(20, 101.0), 3);
    }

    #[test]
    fn mild_queries_have_cause_zero() {
        assert_eq!(estimate_cause(7, 500.0), 0);
    }

    #[test]
    fn fix_suggestion_is_stable_per_cause() {
        assert!(fix_suggestion(1).contains("prefetch_related"));
        assert!(fix_suggestion(2).contains("select_related"));
        assert!(fix_suggestion(3).contains("denormalizing") || fix_suggestion(3).contains("bulk fetch"));
        assert!(fix_suggestion(4).contains("raw SQL"));
        assert_eq!(fix_suggestion(0), "No N+1 pattern detected.");
    }
}

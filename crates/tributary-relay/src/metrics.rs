//! Relay metrics over the `metrics` facade.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: outputs merged into aggregate documents.
    pub const OUTPUTS_RECORDED_TOTAL: &str = "tributary_outputs_recorded_total";
    /// Counter: re-delivered notifications suppressed as duplicates.
    pub const DUPLICATE_OUTPUTS_TOTAL: &str = "tributary_duplicate_outputs_total";
    /// Counter: conditional writes lost to a concurrent writer.
    pub const MERGE_CONFLICTS_TOTAL: &str = "tributary_merge_conflicts_total";
    /// Counter: completion signals by outcome.
    pub const COMPLETION_SIGNALS_TOTAL: &str = "tributary_completion_signals_total";
}

/// Records a merged output.
pub fn record_output_recorded() {
    counter!(names::OUTPUTS_RECORDED_TOTAL).increment(1);
}

/// Records a suppressed duplicate notification.
pub fn record_duplicate_output() {
    counter!(names::DUPLICATE_OUTPUTS_TOTAL).increment(1);
}

/// Records a lost merge race.
pub fn record_merge_conflict() {
    counter!(names::MERGE_CONFLICTS_TOTAL).increment(1);
}

/// Records a completion signal outcome.
pub fn record_completion(outcome: &'static str) {
    counter!(names::COMPLETION_SIGNALS_TOTAL, "outcome" => outcome).increment(1);
}

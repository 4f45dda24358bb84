//! Metrics for the reconciliation pipeline.
//!
//! Counter names follow Prometheus conventions; every name lives in
//! [`MetricName`] so call sites never carry magic strings.

use std::fmt;

/// All metric names emitted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Batch coordinator
    BatchRecordsProcessed,
    BatchRecordsSkipped,
    BatchRecordsErrored,
    BatchRunsCompleted,

    // Normalizer
    NormalizeRecordsEmitted,
    NormalizeWarnings,
    NormalizeValidationFailures,

    // Identity resolver
    ResolveCustomersCreated,
    ResolveCardsCreated,
    ResolvePlaceholdersCreated,
    ResolvePlaceholdersMigrated,
    ResolveFailures,

    // Merge engine
    MergeEventsApplied,
    MergeEventsRejectedDuplicate,
    MergeEventsRejectedOutOfOrder,
    MergeCardsCompleted,

    // Notifications
    NotificationsEnqueued,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::BatchRecordsProcessed => "cardtrack_batch_records_processed_total",
            MetricName::BatchRecordsSkipped => "cardtrack_batch_records_skipped_total",
            MetricName::BatchRecordsErrored => "cardtrack_batch_records_errored_total",
            MetricName::BatchRunsCompleted => "cardtrack_batch_runs_completed_total",
            MetricName::NormalizeRecordsEmitted => "cardtrack_normalize_records_emitted_total",
            MetricName::NormalizeWarnings => "cardtrack_normalize_warnings_total",
            MetricName::NormalizeValidationFailures => {
                "cardtrack_normalize_validation_failures_total"
            }
            MetricName::ResolveCustomersCreated => "cardtrack_resolve_customers_created_total",
            MetricName::ResolveCardsCreated => "cardtrack_resolve_cards_created_total",
            MetricName::ResolvePlaceholdersCreated => {
                "cardtrack_resolve_placeholders_created_total"
            }
            MetricName::ResolvePlaceholdersMigrated => {
                "cardtrack_resolve_placeholders_migrated_total"
            }
            MetricName::ResolveFailures => "cardtrack_resolve_failures_total",
            MetricName::MergeEventsApplied => "cardtrack_merge_events_applied_total",
            MetricName::MergeEventsRejectedDuplicate => {
                "cardtrack_merge_events_rejected_duplicate_total"
            }
            MetricName::MergeEventsRejectedOutOfOrder => {
                "cardtrack_merge_events_rejected_out_of_order_total"
            }
            MetricName::MergeCardsCompleted => "cardtrack_merge_cards_completed_total",
            MetricName::NotificationsEnqueued => "cardtrack_notifications_enqueued_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn increment(name: MetricName) {
    metrics::counter!(name.as_str()).increment(1);
}

pub fn increment_by(name: MetricName, value: u64) {
    metrics::counter!(name.as_str()).increment(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prometheus_style() {
        let names = [
            MetricName::BatchRecordsProcessed,
            MetricName::MergeEventsApplied,
            MetricName::ResolvePlaceholdersMigrated,
        ];
        for name in names {
            assert!(name.as_str().starts_with("cardtrack_"));
            assert!(name.as_str().ends_with("_total"));
        }
    }
}

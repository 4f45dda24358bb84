//! Batch coordinator.
//!
//! Drives one provider batch through normalize, resolve and merge. One
//! bad record never aborts a batch; each raw record lands in exactly
//! one of three buckets.

use cardtrack_core::storage::CustomerStore;
use cardtrack_core::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::notify::{Notification, NotificationSink, MILESTONE_STATUSES};
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::processing::merge::{MergeOutcome, TimelineMergeEngine};
use crate::pipeline::processing::normalize::FieldNormalizer;
use crate::pipeline::processing::resolve::IdentityResolver;
use crate::templates::Template;

/// Per-batch tally. `skipped` covers rejected merges and unresolvable
/// records; `errors` covers validation failures and per-record faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct BatchCoordinator {
    normalizer: FieldNormalizer,
    resolver: IdentityResolver,
    merge: TimelineMergeEngine,
    store: Arc<dyn CustomerStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl BatchCoordinator {
    pub fn new(store: Arc<dyn CustomerStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            normalizer: FieldNormalizer::new(),
            resolver: IdentityResolver::new(store.clone()),
            merge: TimelineMergeEngine::new(),
            store,
            notifier,
        }
    }

    pub async fn process_batch(
        &self,
        raw_records: &[Value],
        template: &Template,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for raw in raw_records {
            match self.process_record(raw, template, &mut outcome).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(provider = %template.provider_name, error = %e, "Record failed");
                    outcome.errors += 1;
                    metrics::increment(MetricName::BatchRecordsErrored);
                }
            }
        }
        info!(
            provider = %template.provider_name,
            processed = outcome.processed,
            skipped = outcome.skipped,
            errors = outcome.errors,
            "Batch complete"
        );
        metrics::increment(MetricName::BatchRunsCompleted);
        Ok(outcome)
    }

    /// One raw payload, which may fan out into several normalized
    /// records when the template declares a history field.
    pub(crate) async fn process_record(
        &self,
        raw: &Value,
        template: &Template,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let normalized = self.normalizer.normalize(raw, template)?;
        metrics::increment_by(MetricName::NormalizeRecordsEmitted, normalized.len() as u64);
        for item in normalized {
            if !item.warnings.is_empty() {
                metrics::increment_by(MetricName::NormalizeWarnings, item.warnings.len() as u64);
            }
            let failures = self.normalizer.validate(&item.record, template.provider_type);
            if !failures.is_empty() {
                metrics::increment(MetricName::NormalizeValidationFailures);
                warn!(
                    provider = %template.provider_name,
                    failures = ?failures,
                    "Record failed validation"
                );
                outcome.errors += 1;
                metrics::increment(MetricName::BatchRecordsErrored);
                continue;
            }

            let Some(event) = item.event else {
                // Statuses outside the template's vocabulary (heartbeats,
                // internal codes) are dropped without complaint.
                debug!(provider = %template.provider_name, "No timeline event, skipping");
                outcome.skipped += 1;
                metrics::increment(MetricName::BatchRecordsSkipped);
                continue;
            };

            let mut resolution = match self.resolver.resolve(&item.record, template).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(provider = %template.provider_name, error = %e, "Unresolvable record");
                    outcome.skipped += 1;
                    metrics::increment(MetricName::BatchRecordsSkipped);
                    continue;
                }
            };

            match self.merge.apply(
                &mut resolution.customer,
                resolution.card_index,
                &item.record,
                &event,
            )? {
                MergeOutcome::Applied => {
                    self.store.upsert_customer(&resolution.customer).await?;
                    outcome.processed += 1;
                    metrics::increment(MetricName::BatchRecordsProcessed);
                    if MILESTONE_STATUSES.contains(&event.status.as_str()) {
                        let card_id =
                            resolution.customer.cards[resolution.card_index].card_id.clone();
                        self.notifier
                            .notify(Notification {
                                customer_id: resolution.customer.id.clone(),
                                card_id,
                                event: event.clone(),
                            })
                            .await?;
                    }
                }
                MergeOutcome::RejectedDuplicate | MergeOutcome::RejectedOutOfOrder => {
                    outcome.skipped += 1;
                    metrics::increment(MetricName::BatchRecordsSkipped);
                }
            }
        }
        Ok(())
    }
}

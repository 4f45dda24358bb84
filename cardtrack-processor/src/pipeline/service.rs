//! Ingestion service.
//!
//! Concurrency hardening over the batch coordinator. Without it, two
//! concurrent events carrying the same lookup key can both miss the
//! store and provision two placeholder customers. The service derives
//! the tracking-id keys a record will touch and holds a per-key async
//! lock for the duration of that record's pipeline pass. Keys are
//! always acquired in sorted order.

use cardtrack_core::domain::TrackingIdKind;
use cardtrack_core::storage::CustomerStore;
use cardtrack_core::{Result, TrackerError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::notify::NotificationSink;
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::batch::{BatchCoordinator, BatchOutcome};
use crate::pipeline::processing::normalize::FieldNormalizer;
use crate::templates::Template;

pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(30);

/// A map of independent async mutexes, one per tracking-id key.
/// Entries are created on first use and kept for the process lifetime;
/// the key space is bounded by the number of cards seen in a run.
#[derive(Default)]
pub struct KeyedLock {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock every key, in sorted deduplicated order so that two tasks
    /// locking overlapping key sets can never deadlock.
    pub async fn acquire_all(&self, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<&String> = keys.iter().collect();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.handle(key).lock_owned().await);
        }
        guards
    }
}

pub struct IngestionService {
    coordinator: BatchCoordinator,
    normalizer: FieldNormalizer,
    pub(crate) locks: KeyedLock,
    record_timeout: Duration,
}

impl IngestionService {
    pub fn new(store: Arc<dyn CustomerStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            coordinator: BatchCoordinator::new(store, notifier),
            normalizer: FieldNormalizer::new(),
            locks: KeyedLock::new(),
            record_timeout: DEFAULT_RECORD_TIMEOUT,
        }
    }

    pub fn with_record_timeout(mut self, record_timeout: Duration) -> Self {
        self.record_timeout = record_timeout;
        self
    }

    /// Process a provider batch, one record at a time, each under its
    /// tracking-id locks and a bounded timeout. A timed-out record is
    /// an error for the whole batch since its locks' state is unknown.
    pub async fn ingest(&self, raw_records: &[Value], template: &Template) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for raw in raw_records {
            let work = self.ingest_record(raw, template, &mut outcome);
            match tokio::time::timeout(self.record_timeout, work).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(provider = %template.provider_name, error = %e, "Record failed");
                    outcome.errors += 1;
                    metrics::increment(MetricName::BatchRecordsErrored);
                }
                Err(_) => {
                    return Err(TrackerError::Timeout {
                        seconds: self.record_timeout.as_secs(),
                    });
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

    async fn ingest_record(
        &self,
        raw: &Value,
        template: &Template,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let keys = self.lock_keys(raw, template)?;
        let _guards = self.locks.acquire_all(&keys).await;
        self.coordinator.process_record(raw, template, outcome).await
    }

    /// Every tracking-id key the record could read or write, as
    /// `kind:value` strings.
    fn lock_keys(&self, raw: &Value, template: &Template) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.normalizer.normalize(raw, template)? {
            for kind in [
                TrackingIdKind::ApplicationId,
                TrackingIdKind::CustomerId,
                TrackingIdKind::ManufacturerOrderId,
                TrackingIdKind::LogisticsTrackingNumber,
            ] {
                if let Some(value) = item.record.tracking_value(kind) {
                    keys.push(format!("{}:{value}", kind.as_str()));
                }
            }
        }
        Ok(keys)
    }
}

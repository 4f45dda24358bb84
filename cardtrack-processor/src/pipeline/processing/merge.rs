//! Timeline merge engine.
//!
//! Applies one timeline event to a resolved card: ordering and
//! duplicate protection, stage/status progression, and derived fields
//! (current status, pending stages, estimated delivery, completion).
//! Rejections are ordinary outcomes, never errors; each merge is
//! all-or-nothing against the card it targets.

use cardtrack_core::domain::{
    Card, CurrentStatus, Customer, Stage, TimelineEvent, TrackingIdKind, TrackingStatus,
};
use cardtrack_core::{Result, TrackerError};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::debug;

use crate::observability::metrics::{self, MetricName};
use crate::pipeline::processing::normalize::{CanonicalRecord, CANONICAL_TIMESTAMP_FORMAT};

/// Statuses that close a card's journey. Once one is accepted the card
/// is completed and immutable going forward.
pub const TERMINAL_STATUSES: [&str; 4] = [
    "DELIVERED",
    "APPLICATION_REJECTED",
    "APPLICATION_CANCELLED",
    "RETURNED_TO_SENDER",
];

/// Milestones that trigger an estimated-delivery recomputation.
const DELIVERY_RECOMPUTE_STATUSES: [&str; 4] = [
    "APPLICATION_APPROVED",
    "PRODUCTION_QUEUED",
    "CARD_PERSONALIZED",
    "DISPATCHED",
];

/// Days until delivery, keyed by milestone status.
static DELIVERY_OFFSETS: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([
        ("APPLICATION_APPROVED", 6),
        ("PRODUCTION_QUEUED", 4),
        ("PRODUCTION_STARTED", 4),
        ("CARD_PERSONALIZED", 3),
        ("DISPATCHED", 2),
        ("IN_TRANSIT", 1),
        ("OUT_FOR_DELIVERY", 0),
    ])
});

/// Known intra-stage status orderings. A new event whose status sits
/// strictly earlier than the card's current status within the same
/// stage is a stale retry and is rejected. Statuses absent from the
/// table (terminal rejections among them) are exempt.
static STAGE_PROGRESSIONS: Lazy<HashMap<Stage, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        (
            Stage::ApplicationAndApproval,
            vec![
                "APPLICATION_SUBMITTED",
                "APPLICATION_UNDER_REVIEW",
                "APPLICATION_APPROVED",
            ],
        ),
        (
            Stage::CardProduction,
            vec![
                "PRODUCTION_QUEUED",
                "PRODUCTION_STARTED",
                "CARD_PERSONALIZED",
                "PRODUCTION_COMPLETED",
                "DISPATCHED",
            ],
        ),
        (
            Stage::ShippingAndDelivery,
            vec![
                "SHIPMENT_CREATED",
                "IN_TRANSIT",
                "OUT_FOR_DELIVERY",
                "DELIVERED",
            ],
        ),
    ])
});

/// Outcome of applying one event to one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    RejectedDuplicate,
    RejectedOutOfOrder,
}

#[derive(Debug, Default)]
pub struct TimelineMergeEngine;

impl TimelineMergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `event` to the card at `card_index`, or reject it. The
    /// customer document is only mutated on acceptance.
    pub fn apply(
        &self,
        customer: &mut Customer,
        card_index: usize,
        record: &CanonicalRecord,
        event: &TimelineEvent,
    ) -> Result<MergeOutcome> {
        let card = customer
            .cards
            .get_mut(card_index)
            .ok_or_else(|| TrackerError::Invariant {
                message: format!(
                    "resolved card index {card_index} out of bounds for customer {}",
                    customer.id
                ),
            })?;

        if let Some(current) = &card.current_status {
            // Stage regression is an out-of-order delivery, not data
            if event.stage < current.stage {
                debug!(card_id = %card.card_id, status = %event.status, "Rejected stage regression");
                metrics::increment(MetricName::MergeEventsRejectedOutOfOrder);
                return Ok(MergeOutcome::RejectedOutOfOrder);
            }
            if event.stage == current.stage {
                if let Some(order) = STAGE_PROGRESSIONS.get(&event.stage) {
                    let current_pos = order.iter().position(|s| *s == current.status);
                    let new_pos = order.iter().position(|s| *s == event.status);
                    if let (Some(current_pos), Some(new_pos)) = (current_pos, new_pos) {
                        if new_pos < current_pos {
                            debug!(
                                card_id = %card.card_id,
                                current = %current.status,
                                incoming = %event.status,
                                "Rejected stale intermediate status"
                            );
                            metrics::increment(MetricName::MergeEventsRejectedOutOfOrder);
                            return Ok(MergeOutcome::RejectedOutOfOrder);
                        }
                    }
                }
            }
        }

        if let Some(last) = card.timeline.events(event.stage).last() {
            let advances = event.timestamp > last.timestamp;
            let distinct = (event.status.as_str(), event.location.as_str())
                != (last.status.as_str(), last.location.as_str());
            if !(advances && distinct) {
                debug!(card_id = %card.card_id, status = %event.status, "Rejected duplicate/stale event");
                metrics::increment(MetricName::MergeEventsRejectedDuplicate);
                return Ok(MergeOutcome::RejectedDuplicate);
            }
        }

        // Terminal state is immutable going forward
        if card.tracking_status == TrackingStatus::Completed {
            debug!(card_id = %card.card_id, status = %event.status, "Rejected event on completed card");
            metrics::increment(MetricName::MergeEventsRejectedOutOfOrder);
            return Ok(MergeOutcome::RejectedOutOfOrder);
        }

        card.timeline.events_mut(event.stage).push(event.clone());
        card.current_status = Some(CurrentStatus {
            status: event.status.clone(),
            stage: event.stage,
            location: event.location.clone(),
            last_updated: event.timestamp.clone(),
            description: event.description.clone(),
        });

        self.merge_tracking_ids(card, record);
        self.merge_application_metadata(card, record);

        if DELIVERY_RECOMPUTE_STATUSES.contains(&event.status.as_str()) {
            if let Some(days) = DELIVERY_OFFSETS.get(event.status.as_str()) {
                let estimated = Utc::now() + Duration::days(*days);
                card.estimated_delivery =
                    Some(estimated.format(CANONICAL_TIMESTAMP_FORMAT).to_string());
            }
        }

        if TERMINAL_STATUSES.contains(&event.status.as_str()) {
            card.tracking_status = TrackingStatus::Completed;
            card.pending_stages.clear();
            metrics::increment(MetricName::MergeCardsCompleted);
        } else {
            card.pending_stages = event.stage.stages_after();
        }

        card.metadata.touch();
        customer.metadata.touch();
        metrics::increment(MetricName::MergeEventsApplied);
        Ok(MergeOutcome::Applied)
    }

    fn merge_tracking_ids(&self, card: &mut Card, record: &CanonicalRecord) {
        for kind in [
            TrackingIdKind::ApplicationId,
            TrackingIdKind::CustomerId,
            TrackingIdKind::ManufacturerOrderId,
            TrackingIdKind::LogisticsTrackingNumber,
        ] {
            card.tracking_ids.merge(kind, record.tracking_value(kind));
        }
    }

    fn merge_application_metadata(&self, card: &mut Card, record: &CanonicalRecord) {
        let meta = &mut card.application_metadata;
        if let Some(courier) = record.get_field("courier_partner") {
            meta.courier_partner = Some(courier.to_string());
        }
        if let Some(tracking) = record
            .get_field("tracking_number")
            .or_else(|| record.get_field("logistics_tracking_number"))
        {
            meta.current_tracking_number = Some(tracking.to_string());
        }
        if let Some(batch) = record.get_field("production_batch") {
            meta.production_batch = Some(batch.to_string());
        }
        if let Some(facility) = record.get_field("facility_location") {
            meta.facility_location = Some(facility.to_string());
        }
        if let Some(priority) = record.get_field("priority") {
            meta.priority = priority.to_string();
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three fixed lifecycle stages of a card's journey, in order.
/// Ordering of the variants is load-bearing: stage progression checks
/// compare stages with `<`/`>`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ApplicationAndApproval,
    CardProduction,
    ShippingAndDelivery,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::ApplicationAndApproval,
        Stage::CardProduction,
        Stage::ShippingAndDelivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ApplicationAndApproval => "application_and_approval",
            Stage::CardProduction => "card_production",
            Stage::ShippingAndDelivery => "shipping_and_delivery",
        }
    }

    /// Stages strictly after `self` in the fixed order.
    pub fn stages_after(&self) -> Vec<Stage> {
        Stage::ALL.iter().copied().filter(|s| s > self).collect()
    }
}

/// Whether a card's journey is still in flight or has reached a terminal
/// status. Transitions `Active -> Completed` exactly once and never back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Active,
    Completed,
}

/// The identifier fields used to join events across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingIdKind {
    ApplicationId,
    CustomerId,
    ManufacturerOrderId,
    LogisticsTrackingNumber,
}

impl TrackingIdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingIdKind::ApplicationId => "application_id",
            TrackingIdKind::CustomerId => "customer_id",
            TrackingIdKind::ManufacturerOrderId => "manufacturer_order_id",
            TrackingIdKind::LogisticsTrackingNumber => "logistics_tracking_number",
        }
    }

    pub fn parse(s: &str) -> Option<TrackingIdKind> {
        match s {
            "application_id" => Some(TrackingIdKind::ApplicationId),
            "customer_id" => Some(TrackingIdKind::CustomerId),
            "manufacturer_order_id" => Some(TrackingIdKind::ManufacturerOrderId),
            "logistics_tracking_number" => Some(TrackingIdKind::LogisticsTrackingNumber),
            _ => None,
        }
    }
}

/// Cross-provider join key set. Fields are populated incrementally as
/// providers report them and are never cleared once set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingIds {
    pub application_id: Option<String>,
    pub customer_id: Option<String>,
    pub manufacturer_order_id: Option<String>,
    pub logistics_tracking_number: Option<String>,
}

impl TrackingIds {
    pub fn get(&self, kind: TrackingIdKind) -> Option<&str> {
        match kind {
            TrackingIdKind::ApplicationId => self.application_id.as_deref(),
            TrackingIdKind::CustomerId => self.customer_id.as_deref(),
            TrackingIdKind::ManufacturerOrderId => self.manufacturer_order_id.as_deref(),
            TrackingIdKind::LogisticsTrackingNumber => self.logistics_tracking_number.as_deref(),
        }
    }

    /// Set a tracking id, never overwriting an existing value with null
    /// (and never clearing). A later non-null value may correct an
    /// earlier one.
    pub fn merge(&mut self, kind: TrackingIdKind, value: Option<&str>) {
        let Some(value) = value else { return };
        let slot = match kind {
            TrackingIdKind::ApplicationId => &mut self.application_id,
            TrackingIdKind::CustomerId => &mut self.customer_id,
            TrackingIdKind::ManufacturerOrderId => &mut self.manufacturer_order_id,
            TrackingIdKind::LogisticsTrackingNumber => &mut self.logistics_tracking_number,
        };
        *slot = Some(value.to_string());
    }
}

/// One immutable entry in a card's per-stage timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEvent {
    /// Canonical status (e.g. `APPLICATION_APPROVED`).
    pub status: String,
    pub stage: Stage,
    /// Canonical ISO-8601 UTC timestamp. Kept as a string so that
    /// unparseable provider timestamps can pass through flagged rather
    /// than blocking ingestion; for the canonical form, lexicographic
    /// order is timestamp order.
    pub timestamp: String,
    pub description: String,
    pub location: String,
    /// Name of the reporting provider.
    pub provider: String,
}

/// Per-stage event lists. One explicit field per stage so the merge
/// engine gets compile-time coverage of the stage domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    pub application_and_approval: Vec<TimelineEvent>,
    pub card_production: Vec<TimelineEvent>,
    pub shipping_and_delivery: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn events(&self, stage: Stage) -> &Vec<TimelineEvent> {
        match stage {
            Stage::ApplicationAndApproval => &self.application_and_approval,
            Stage::CardProduction => &self.card_production,
            Stage::ShippingAndDelivery => &self.shipping_and_delivery,
        }
    }

    pub fn events_mut(&mut self, stage: Stage) -> &mut Vec<TimelineEvent> {
        match stage {
            Stage::ApplicationAndApproval => &mut self.application_and_approval,
            Stage::CardProduction => &mut self.card_production,
            Stage::ShippingAndDelivery => &mut self.shipping_and_delivery,
        }
    }
}

/// Derived view of the most recently accepted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentStatus {
    pub status: String,
    pub stage: Stage,
    pub location: String,
    pub last_updated: String,
    pub description: String,
}

/// Bank-sourced card descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardInfo {
    pub bank_name: Option<String>,
    pub card_type: Option<String>,
    pub card_variant: Option<String>,
}

/// Free-form provider-contributed fulfillment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    pub courier_partner: Option<String>,
    pub current_tracking_number: Option<String>,
    pub production_batch: Option<String>,
    pub facility_location: Option<String>,
    /// Fulfillment priority, `standard` unless a provider says otherwise.
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_priority() -> String {
    "standard".to_string()
}

impl Default for ApplicationMetadata {
    fn default() -> Self {
        Self {
            courier_partner: None,
            current_tracking_number: None,
            production_batch: None,
            facility_location: None,
            priority: default_priority(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl RecordMetadata {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_updated: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// One physical card moving through application, production and
/// shipping. Never deleted; identity (`card_id`) is stable across a
/// placeholder-to-real customer migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub card_id: String,
    pub tracking_ids: TrackingIds,
    pub tracking_status: TrackingStatus,
    pub card_info: CardInfo,
    pub current_status: Option<CurrentStatus>,
    pub timeline: Timeline,
    pub pending_stages: Vec<Stage>,
    pub estimated_delivery: Option<String>,
    pub application_metadata: ApplicationMetadata,
    pub metadata: RecordMetadata,
}

impl Card {
    pub fn new(card_id: String, tracking_ids: TrackingIds) -> Self {
        Self {
            card_id,
            tracking_ids,
            tracking_status: TrackingStatus::Active,
            card_info: CardInfo::default(),
            current_status: None,
            timeline: Timeline::default(),
            pending_stages: Stage::ALL.to_vec(),
            estimated_delivery: None,
            application_metadata: ApplicationMetadata::default(),
            metadata: RecordMetadata::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
}

/// Document-store root: one customer owning an ordered list of cards.
/// `placeholder` marks a synthetic customer provisioned for events that
/// outran their bank record; it is retired once the real customer id
/// arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub placeholder: bool,
    pub info: CustomerInfo,
    pub cards: Vec<Card>,
    pub metadata: RecordMetadata,
}

impl Customer {
    pub fn new(id: String, info: CustomerInfo) -> Self {
        Self {
            id,
            placeholder: false,
            info,
            cards: Vec::new(),
            metadata: RecordMetadata::now(),
        }
    }

    pub fn new_placeholder(id: String) -> Self {
        Self {
            id,
            placeholder: true,
            info: CustomerInfo::default(),
            cards: Vec::new(),
            metadata: RecordMetadata::now(),
        }
    }

    pub fn card_index_by_tracking_id(
        &self,
        kind: TrackingIdKind,
        value: &str,
    ) -> Option<usize> {
        self.cards
            .iter()
            .position(|c| c.tracking_ids.get(kind) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_fixed() {
        assert!(Stage::ApplicationAndApproval < Stage::CardProduction);
        assert!(Stage::CardProduction < Stage::ShippingAndDelivery);
    }

    #[test]
    fn stages_after_final_stage_is_empty() {
        assert!(Stage::ShippingAndDelivery.stages_after().is_empty());
        assert_eq!(
            Stage::ApplicationAndApproval.stages_after(),
            vec![Stage::CardProduction, Stage::ShippingAndDelivery]
        );
    }

    #[test]
    fn tracking_ids_merge_never_clears() {
        let mut ids = TrackingIds::default();
        ids.merge(TrackingIdKind::ApplicationId, Some("APP_001"));
        ids.merge(TrackingIdKind::ApplicationId, None);
        assert_eq!(ids.get(TrackingIdKind::ApplicationId), Some("APP_001"));
    }

    #[test]
    fn application_metadata_defaults_to_standard_priority() {
        assert_eq!(ApplicationMetadata::default().priority, "standard");
        let parsed: ApplicationMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.priority, "standard");
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::ApplicationAndApproval).unwrap();
        assert_eq!(json, "\"application_and_approval\"");
    }
}

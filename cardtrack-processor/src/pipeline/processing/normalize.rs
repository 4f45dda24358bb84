//! Field normalization and timeline event building.
//!
//! Turns one raw provider record (or one element of its embedded
//! history list) into canonical records, each carrying at most one
//! [`TimelineEvent`]. Phone numbers and timestamps are normalized here;
//! unknown raw statuses yield a record without an event so the batch
//! coordinator can count the skip.

use cardtrack_core::domain::{TimelineEvent, TrackingIdKind};
use cardtrack_core::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::extract::{value_to_string, PathExpr};
use crate::templates::{ProviderType, Template};

/// Canonical timestamp rendering. Lexicographic order on this form is
/// timestamp order, which the merge engine relies on.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Accepted provider timestamp formats, tried in order.
const ACCEPTED_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").unwrap());
static CANONICAL_MOBILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+91[6-9]\d{9}$").unwrap());

/// Bank-provided canonical fields. Every field is optional; extraction
/// fills whatever the payload carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankRecord {
    pub customer_id: Option<String>,
    pub application_id: Option<String>,
    pub customer_name: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub card_type: Option<String>,
    pub card_variant: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub timestamp: Option<String>,
    pub application_date: Option<String>,
    pub approval_date: Option<String>,
    pub last_updated: Option<String>,
}

/// Manufacturer/logistics canonical fields (the fulfillment family).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfillmentRecord {
    pub application_id: Option<String>,
    pub manufacturer_order_id: Option<String>,
    pub tracking_number: Option<String>,
    pub logistics_tracking_number: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub current_location: Option<String>,
    pub facility_location: Option<String>,
    pub courier_partner: Option<String>,
    pub production_batch: Option<String>,
    pub priority: Option<String>,
    pub timestamp: Option<String>,
    pub received_date: Option<String>,
    pub production_end_date: Option<String>,
    pub dispatch_date: Option<String>,
    pub last_updated: Option<String>,
}

/// One normalized record. The explicit per-family structs give the
/// merge engine compile-time coverage of which fields it may read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalRecord {
    Bank(BankRecord),
    Fulfillment(FulfillmentRecord),
}

macro_rules! field_accessors {
    ($record:expr, $key:expr, { $($name:ident),+ $(,)? }) => {
        match $key {
            $(stringify!($name) => Some(&mut $record.$name),)+
            _ => None,
        }
    };
}

impl CanonicalRecord {
    pub fn for_provider(provider_type: ProviderType) -> Self {
        if provider_type.is_bank() {
            CanonicalRecord::Bank(BankRecord::default())
        } else {
            CanonicalRecord::Fulfillment(FulfillmentRecord::default())
        }
    }

    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match self {
            CanonicalRecord::Bank(r) => field_accessors!(r, key, {
                customer_id, application_id, customer_name, mobile, email,
                card_type, card_variant, status, location, timestamp,
                application_date, approval_date, last_updated,
            }),
            CanonicalRecord::Fulfillment(r) => field_accessors!(r, key, {
                application_id, manufacturer_order_id, tracking_number,
                logistics_tracking_number, status, location, current_location,
                facility_location, courier_partner, production_batch, priority,
                timestamp, received_date, production_end_date, dispatch_date,
                last_updated,
            }),
        }
    }

    /// Set a canonical field by name. Returns false for a field the
    /// family does not carry (the mapping is ignored, not an error).
    pub fn set_field(&mut self, key: &str, value: String) -> bool {
        match self.slot(key) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        macro_rules! read {
            ($record:expr, { $($name:ident),+ $(,)? }) => {
                match key {
                    $(stringify!($name) => $record.$name.as_deref(),)+
                    _ => None,
                }
            };
        }
        match self {
            CanonicalRecord::Bank(r) => read!(r, {
                customer_id, application_id, customer_name, mobile, email,
                card_type, card_variant, status, location, timestamp,
                application_date, approval_date, last_updated,
            }),
            CanonicalRecord::Fulfillment(r) => read!(r, {
                application_id, manufacturer_order_id, tracking_number,
                logistics_tracking_number, status, location, current_location,
                facility_location, courier_partner, production_batch, priority,
                timestamp, received_date, production_end_date, dispatch_date,
                last_updated,
            }),
        }
    }

    /// Raw provider status, if any.
    pub fn status(&self) -> Option<&str> {
        match self {
            CanonicalRecord::Bank(r) => r.status.as_deref(),
            CanonicalRecord::Fulfillment(r) => r.status.as_deref(),
        }
    }

    /// The value of a tracking-id field, with the manufacturer's
    /// `tracking_number` standing in for the logistics number it hands
    /// off.
    pub fn tracking_value(&self, kind: TrackingIdKind) -> Option<&str> {
        match (self, kind) {
            (CanonicalRecord::Bank(r), TrackingIdKind::ApplicationId) => r.application_id.as_deref(),
            (CanonicalRecord::Bank(r), TrackingIdKind::CustomerId) => r.customer_id.as_deref(),
            (CanonicalRecord::Bank(_), _) => None,
            (CanonicalRecord::Fulfillment(r), TrackingIdKind::ApplicationId) => {
                r.application_id.as_deref()
            }
            (CanonicalRecord::Fulfillment(_), TrackingIdKind::CustomerId) => None,
            (CanonicalRecord::Fulfillment(r), TrackingIdKind::ManufacturerOrderId) => {
                r.manufacturer_order_id.as_deref()
            }
            (CanonicalRecord::Fulfillment(r), TrackingIdKind::LogisticsTrackingNumber) => r
                .logistics_tracking_number
                .as_deref()
                .or(r.tracking_number.as_deref()),
        }
    }
}

/// A canonical record plus its timeline event (if the raw status mapped
/// to one) and any normalization warnings.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub record: CanonicalRecord,
    pub event: Option<TimelineEvent>,
    pub warnings: Vec<String>,
}

/// Applies a provider template to raw payloads.
#[derive(Debug, Default)]
pub struct FieldNormalizer;

impl FieldNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one raw record into zero or more canonical records, in
    /// input order for embedded histories.
    pub fn normalize(&self, raw: &Value, template: &Template) -> Result<Vec<NormalizedRecord>> {
        let mut warnings = Vec::new();
        let mut base = CanonicalRecord::for_provider(template.provider_type);

        for (key, path) in &template.field_mappings {
            let expr = match PathExpr::parse(path) {
                Ok(expr) => expr,
                Err(e) => {
                    warn!(field = %key, %path, error = %e, "Skipping malformed field mapping");
                    continue;
                }
            };
            if let Some(value) = expr.evaluate(raw).and_then(value_to_string) {
                if !base.set_field(key, value) {
                    debug!(field = %key, "Mapping targets a field this provider family does not carry");
                }
            }
        }

        if let Some(mobile) = base.get_field("mobile").map(str::to_string) {
            let (normalized, warning) = normalize_phone(&mobile);
            if let Some(warning) = warning {
                warnings.push(warning);
            }
            base.set_field("mobile", normalized);
        }

        let history_items = template
            .history_field
            .as_deref()
            .and_then(|field| raw.get(field))
            .and_then(Value::as_array);

        let records = match history_items {
            Some(items) => items
                .iter()
                .map(|item| {
                    let mut record = base.clone();
                    let mut item_warnings = warnings.clone();
                    for (key, item_key) in &template.history_mappings {
                        if let Some(value) = item.get(item_key.as_str()).and_then(value_to_string) {
                            record.set_field(key, value);
                        }
                    }
                    let event = self.build_timeline_event(&mut record, template, &mut item_warnings);
                    NormalizedRecord {
                        record,
                        event,
                        warnings: item_warnings,
                    }
                })
                .collect(),
            None => {
                let event = self.build_timeline_event(&mut base, template, &mut warnings);
                vec![NormalizedRecord {
                    record: base,
                    event,
                    warnings,
                }]
            }
        };

        Ok(records)
    }

    /// Resolve the raw status through the template's vocabulary and
    /// stamp the event with a normalized timestamp. Unknown or absent
    /// statuses build no event; heartbeat payloads are expected.
    fn build_timeline_event(
        &self,
        record: &mut CanonicalRecord,
        template: &Template,
        warnings: &mut Vec<String>,
    ) -> Option<TimelineEvent> {
        let raw_status = record.status()?.to_string();
        let mapping = template.status_mappings.get(&raw_status)?;

        let raw_timestamp = template
            .timestamp_fields()
            .iter()
            .find_map(|field| record.get_field(field))
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().format(CANONICAL_TIMESTAMP_FORMAT).to_string());

        let (timestamp, parsed) = normalize_timestamp(&raw_timestamp);
        if !parsed {
            warnings.push(format!("Unparseable timestamp passed through: {raw_timestamp}"));
        }

        let location = record
            .get_field("location")
            .or_else(|| record.get_field("current_location"))
            .or_else(|| record.get_field("facility_location"))
            .unwrap_or("Unknown")
            .to_string();

        Some(TimelineEvent {
            status: mapping.status.clone(),
            stage: mapping.stage,
            timestamp,
            description: mapping.description.clone(),
            location,
            provider: template.provider_name.clone(),
        })
    }

    /// Required-field and format validation for a canonical record.
    pub fn validate(&self, record: &CanonicalRecord, provider_type: ProviderType) -> Vec<String> {
        let mut errors = Vec::new();
        let required: &[&str] = match provider_type {
            ProviderType::Bank => &["customer_id", "application_id", "status"],
            ProviderType::CardManufacturer => &["application_id"],
            ProviderType::Logistics => &["logistics_tracking_number"],
        };
        for field in required {
            if record.get_field(field).map_or(true, str::is_empty) {
                errors.push(format!("Missing required field: {field}"));
            }
        }

        if let Some(mobile) = record.get_field("mobile") {
            if !mobile.is_empty() && !CANONICAL_MOBILE.is_match(mobile) {
                errors.push(format!("Invalid mobile format: {mobile}"));
            }
        }
        errors
    }
}

/// Normalize a phone number to canonical `+91XXXXXXXXXX` form. Numbers
/// that fit neither accepted shape pass through with a warning.
pub fn normalize_phone(phone: &str) -> (String, Option<String>) {
    let digits = NON_DIGITS.replace_all(phone, "");
    if digits.len() == 12 && digits.starts_with("91") {
        (format!("+91{}", &digits[2..]), None)
    } else if digits.len() == 10 && digits.starts_with(['6', '7', '8', '9']) {
        (format!("+91{digits}"), None)
    } else {
        (
            phone.to_string(),
            Some(format!("Could not normalize phone: {phone}")),
        )
    }
}

/// Normalize a timestamp across the accepted input formats to canonical
/// UTC ISO-8601. Unparseable input passes through unchanged with
/// `false` so ingestion is never blocked.
pub fn normalize_timestamp(input: &str) -> (String, bool) {
    for format in ACCEPTED_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return (dt.format(CANONICAL_TIMESTAMP_FORMAT).to_string(), true);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return (dt.format(CANONICAL_TIMESTAMP_FORMAT).to_string(), true);
    }
    (input.to_string(), false)
}

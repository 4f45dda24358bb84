//! Identity resolver.
//!
//! Maps a normalized record to exactly one customer and one card. Bank
//! records carry an explicit customer id and may trigger a
//! placeholder-to-real migration; manufacturer and logistics records
//! are matched through their template's lookup key, falling back to a
//! deterministic placeholder customer when the bank record has not
//! arrived yet.

use cardtrack_core::domain::{Card, Customer, CustomerInfo, TrackingIdKind};
use cardtrack_core::storage::CustomerStore;
use cardtrack_core::{Result, TrackerError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::observability::metrics::{self, MetricName};
use crate::pipeline::processing::normalize::CanonicalRecord;
use crate::templates::Template;

/// A resolved (customer, card) pair. The customer is a working copy;
/// creations and migrations are already persisted by the resolver, but
/// merge results are only persisted by the caller on acceptance.
#[derive(Debug)]
pub struct Resolution {
    pub customer: Customer,
    pub card_index: usize,
    pub created_card: bool,
    pub migrated: bool,
}

pub struct IdentityResolver {
    store: Arc<dyn CustomerStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn CustomerStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        record: &CanonicalRecord,
        template: &Template,
    ) -> Result<Resolution> {
        let resolution = match record {
            CanonicalRecord::Bank(_) => self.resolve_bank(record, template).await,
            CanonicalRecord::Fulfillment(_) => self.resolve_fulfillment(record, template).await,
        };
        if resolution.is_err() {
            metrics::increment(MetricName::ResolveFailures);
        }
        resolution
    }

    /// Bank path: explicit customer id, card keyed by application id.
    async fn resolve_bank(
        &self,
        record: &CanonicalRecord,
        template: &Template,
    ) -> Result<Resolution> {
        let customer_id = record
            .tracking_value(TrackingIdKind::CustomerId)
            .ok_or_else(|| TrackerError::Resolution {
                message: "bank record is missing customer_id".to_string(),
            })?
            .to_string();
        let application_id = record
            .tracking_value(TrackingIdKind::ApplicationId)
            .ok_or_else(|| TrackerError::Resolution {
                message: "bank record is missing application_id".to_string(),
            })?
            .to_string();

        let mut customer = match self.store.get_customer(&customer_id).await? {
            Some(existing) => existing,
            None => {
                let created = Customer::new(customer_id.clone(), customer_info(record));
                self.store.upsert_customer(&created).await?;
                info!(customer_id = %customer_id, "Created customer");
                metrics::increment(MetricName::ResolveCustomersCreated);
                created
            }
        };
        self.refresh_customer_info(&mut customer, record);

        if let Some(card_index) =
            customer.card_index_by_tracking_id(TrackingIdKind::ApplicationId, &application_id)
        {
            return Ok(Resolution {
                customer,
                card_index,
                created_card: false,
                migrated: false,
            });
        }

        // An earlier fulfillment event may have parked this card under
        // a placeholder customer; if so, move it to its real owner.
        // Cards owned by a real customer are never moved: a conflicting
        // bank event under another customer id gets its own card.
        if let Some(placeholder) = self
            .store
            .find_customer_with_tracking_id(TrackingIdKind::ApplicationId, &application_id)
            .await?
        {
            if placeholder.placeholder && placeholder.id != customer.id {
                let card_index = self
                    .migrate_card(&mut customer, placeholder, &application_id)
                    .await?;
                return Ok(Resolution {
                    customer,
                    card_index,
                    created_card: false,
                    migrated: true,
                });
            }
        }

        let mut card = Card::new(
            new_card_id(&application_id),
            cardtrack_core::domain::TrackingIds {
                application_id: Some(application_id.clone()),
                customer_id: Some(customer_id.clone()),
                ..Default::default()
            },
        );
        card.card_info = card_info(record, template);
        debug!(customer_id = %customer_id, card_id = %card.card_id, "Created card");
        customer.cards.push(card);
        customer.metadata.touch();
        self.store.upsert_customer(&customer).await?;
        metrics::increment(MetricName::ResolveCardsCreated);

        Ok(Resolution {
            card_index: customer.cards.len() - 1,
            customer,
            created_card: true,
            migrated: false,
        })
    }

    /// Non-bank path: match through the template's lookup key, creating
    /// a deterministic placeholder customer on a miss.
    async fn resolve_fulfillment(
        &self,
        record: &CanonicalRecord,
        template: &Template,
    ) -> Result<Resolution> {
        let lookup_field =
            template
                .lookup_key
                .as_deref()
                .ok_or_else(|| TrackerError::Resolution {
                    message: format!(
                        "template '{}' declares no lookup_key",
                        template.provider_name
                    ),
                })?;
        let kind = TrackingIdKind::parse(lookup_field).ok_or_else(|| TrackerError::Resolution {
            message: format!("unknown lookup_key field '{lookup_field}'"),
        })?;
        let value = record
            .tracking_value(kind)
            .ok_or_else(|| TrackerError::Resolution {
                message: format!("record carries no value for lookup_key '{lookup_field}'"),
            })?
            .to_string();

        if let Some(customer) = self.store.find_customer_with_tracking_id(kind, &value).await? {
            let card_index = customer
                .card_index_by_tracking_id(kind, &value)
                .ok_or_else(|| TrackerError::Invariant {
                    message: format!(
                        "customer {} matched lookup {lookup_field}={value} but has no such card",
                        customer.id
                    ),
                })?;
            return Ok(Resolution {
                customer,
                card_index,
                created_card: false,
                migrated: false,
            });
        }

        // Event arrived before its bank record. Provision a placeholder
        // customer whose id is a pure function of the lookup key, so
        // retries and replays land on the same document.
        let placeholder_id = placeholder_customer_id(kind, &value);
        let mut customer = match self.store.get_customer(&placeholder_id).await? {
            Some(existing) => existing,
            None => {
                info!(
                    customer_id = %placeholder_id,
                    lookup = %lookup_field,
                    "Created placeholder customer"
                );
                metrics::increment(MetricName::ResolvePlaceholdersCreated);
                Customer::new_placeholder(placeholder_id.clone())
            }
        };

        let mut created_card = false;
        let card_index = match customer.card_index_by_tracking_id(kind, &value) {
            Some(index) => index,
            None => {
                created_card = true;
                let mut ids = cardtrack_core::domain::TrackingIds::default();
                for kind in [
                    TrackingIdKind::ApplicationId,
                    TrackingIdKind::ManufacturerOrderId,
                    TrackingIdKind::LogisticsTrackingNumber,
                ] {
                    ids.merge(kind, record.tracking_value(kind));
                }
                let card = Card::new(new_card_id(&value), ids);
                debug!(customer_id = %customer.id, card_id = %card.card_id, "Created card under placeholder");
                customer.cards.push(card);
                metrics::increment(MetricName::ResolveCardsCreated);
                customer.cards.len() - 1
            }
        };
        customer.metadata.touch();
        self.store.upsert_customer(&customer).await?;

        Ok(Resolution {
            customer,
            card_index,
            created_card,
            migrated: false,
        })
    }

    /// Move the card keyed by `application_id` from `placeholder` to
    /// `customer`, retiring the placeholder once it owns nothing.
    /// Returns the card's index within `customer`.
    async fn migrate_card(
        &self,
        customer: &mut Customer,
        mut placeholder: Customer,
        application_id: &str,
    ) -> Result<usize> {
        let source_index = placeholder
            .card_index_by_tracking_id(TrackingIdKind::ApplicationId, application_id)
            .ok_or_else(|| TrackerError::Invariant {
                message: format!(
                    "placeholder {} matched application_id {application_id} but has no such card",
                    placeholder.id
                ),
            })?;
        let mut card = placeholder.cards.remove(source_index);
        card.tracking_ids
            .merge(TrackingIdKind::CustomerId, Some(&customer.id));
        card.metadata.touch();
        info!(
            card_id = %card.card_id,
            from = %placeholder.id,
            to = %customer.id,
            "Migrated card from placeholder"
        );
        customer.cards.push(card);
        customer.metadata.touch();

        // Persist the enlarged owner before retiring the placeholder.
        // The pipeline pass can be cancelled at any await point, and the
        // card must never exist in neither document.
        self.store.upsert_customer(customer).await?;
        if placeholder.cards.is_empty() {
            self.store.delete_customer(&placeholder.id).await?;
        } else {
            placeholder.metadata.touch();
            self.store.upsert_customer(&placeholder).await?;
        }
        metrics::increment(MetricName::ResolvePlaceholdersMigrated);

        Ok(customer.cards.len() - 1)
    }

    /// Bank records may carry fresher contact details.
    fn refresh_customer_info(&self, customer: &mut Customer, record: &CanonicalRecord) {
        if let Some(name) = record.get_field("customer_name") {
            customer.info.name = Some(name.to_string());
        }
        if let Some(mobile) = record.get_field("mobile") {
            customer.info.mobile = Some(mobile.to_string());
        }
        if let Some(email) = record.get_field("email") {
            customer.info.email = Some(email.to_string());
        }
    }
}

fn customer_info(record: &CanonicalRecord) -> CustomerInfo {
    CustomerInfo {
        name: record.get_field("customer_name").map(str::to_string),
        mobile: record.get_field("mobile").map(str::to_string),
        email: record.get_field("email").map(str::to_string),
    }
}

fn card_info(record: &CanonicalRecord, template: &Template) -> cardtrack_core::domain::CardInfo {
    cardtrack_core::domain::CardInfo {
        bank_name: Some(template.provider_name.clone()),
        card_type: record.get_field("card_type").map(str::to_string),
        card_variant: record.get_field("card_variant").map(str::to_string),
    }
}

fn new_card_id(seed: &str) -> String {
    format!("CARD_{seed}_{}", Utc::now().timestamp())
}

/// Deterministic placeholder id: the same lookup key always provisions
/// the same customer document.
pub fn placeholder_customer_id(kind: TrackingIdKind, value: &str) -> String {
    let seed = format!("{}:{value}", kind.as_str());
    format!(
        "PLACEHOLDER_{}",
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardtrack_core::domain::Stage;
    use cardtrack_core::storage::InMemoryCustomerStore;
    use crate::pipeline::processing::normalize::{BankRecord, FulfillmentRecord};
    use crate::templates::{ProviderType, StatusMapping};
    use std::collections::HashMap;

    fn bank_template() -> Template {
        Template {
            provider_type: ProviderType::Bank,
            provider_name: "HDFC Bank".to_string(),
            field_mappings: HashMap::new(),
            history_field: None,
            history_mappings: HashMap::new(),
            status_mappings: HashMap::from([(
                "approved".to_string(),
                StatusMapping {
                    status: "APPLICATION_APPROVED".to_string(),
                    stage: Stage::ApplicationAndApproval,
                    description: "Application approved".to_string(),
                },
            )]),
            lookup_key: Some("customer_id".to_string()),
            timestamp_fields: Vec::new(),
        }
    }

    fn logistics_template() -> Template {
        Template {
            provider_type: ProviderType::Logistics,
            provider_name: "BlueDart".to_string(),
            lookup_key: Some("logistics_tracking_number".to_string()),
            ..bank_template()
        }
    }

    fn manufacturer_template() -> Template {
        Template {
            provider_type: ProviderType::CardManufacturer,
            provider_name: "CardWorks".to_string(),
            lookup_key: Some("application_id".to_string()),
            ..bank_template()
        }
    }

    fn bank_record(customer_id: &str, application_id: &str) -> CanonicalRecord {
        CanonicalRecord::Bank(BankRecord {
            customer_id: Some(customer_id.to_string()),
            application_id: Some(application_id.to_string()),
            customer_name: Some("Priya Sharma".to_string()),
            ..Default::default()
        })
    }

    fn manufacturer_record(application_id: &str) -> CanonicalRecord {
        CanonicalRecord::Fulfillment(FulfillmentRecord {
            application_id: Some(application_id.to_string()),
            manufacturer_order_id: Some("MFG_1".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn bank_record_creates_customer_and_card() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let resolver = IdentityResolver::new(store.clone());

        let resolution = resolver
            .resolve(&bank_record("CUST_1", "APP_001"), &bank_template())
            .await
            .unwrap();
        assert!(resolution.created_card);
        assert!(!resolution.migrated);
        assert_eq!(resolution.customer.id, "CUST_1");
        assert_eq!(resolution.customer.info.name.as_deref(), Some("Priya Sharma"));

        let stored = store.get_customer("CUST_1").await.unwrap().unwrap();
        assert_eq!(stored.cards.len(), 1);
        assert_eq!(
            stored.cards[0].card_info.bank_name.as_deref(),
            Some("HDFC Bank")
        );
    }

    #[tokio::test]
    async fn bank_record_reuses_existing_card() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let resolver = IdentityResolver::new(store.clone());

        resolver
            .resolve(&bank_record("CUST_1", "APP_001"), &bank_template())
            .await
            .unwrap();
        let resolution = resolver
            .resolve(&bank_record("CUST_1", "APP_001"), &bank_template())
            .await
            .unwrap();
        assert!(!resolution.created_card);
        assert_eq!(resolution.customer.cards.len(), 1);
    }

    #[tokio::test]
    async fn fulfillment_miss_creates_deterministic_placeholder() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let resolver = IdentityResolver::new(store.clone());

        let first = resolver
            .resolve(&manufacturer_record("APP_001"), &manufacturer_template())
            .await
            .unwrap();
        assert!(first.customer.placeholder);
        assert!(first.customer.id.starts_with("PLACEHOLDER_"));

        // Same lookup key lands on the same placeholder document
        let second = resolver
            .resolve(&manufacturer_record("APP_001"), &manufacturer_template())
            .await
            .unwrap();
        assert_eq!(second.customer.id, first.customer.id);
        assert_eq!(second.customer.cards.len(), 1);
        assert_eq!(store.all_customers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bank_record_migrates_card_from_placeholder() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let resolver = IdentityResolver::new(store.clone());

        let placeholder = resolver
            .resolve(&manufacturer_record("APP_001"), &manufacturer_template())
            .await
            .unwrap();
        let placeholder_card_id = placeholder.customer.cards[0].card_id.clone();

        let resolution = resolver
            .resolve(&bank_record("CUST_1", "APP_001"), &bank_template())
            .await
            .unwrap();
        assert!(resolution.migrated);
        let card = &resolution.customer.cards[resolution.card_index];
        assert_eq!(card.card_id, placeholder_card_id);
        assert_eq!(card.tracking_ids.customer_id.as_deref(), Some("CUST_1"));

        // Empty placeholder is retired
        let remaining = store.all_customers().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "CUST_1");
    }

    #[tokio::test]
    async fn conflicting_bank_event_does_not_steal_a_real_customers_card() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let resolver = IdentityResolver::new(store.clone());

        resolver
            .resolve(&bank_record("CUST_1", "APP_001"), &bank_template())
            .await
            .unwrap();
        let resolution = resolver
            .resolve(&bank_record("CUST_2", "APP_001"), &bank_template())
            .await
            .unwrap();
        assert!(!resolution.migrated);
        assert!(resolution.created_card);

        let first = store.get_customer("CUST_1").await.unwrap().unwrap();
        let second = store.get_customer("CUST_2").await.unwrap().unwrap();
        assert_eq!(first.cards.len(), 1);
        assert_eq!(second.cards.len(), 1);
        assert_ne!(first.cards[0].card_id, second.cards[0].card_id);
    }

    /// Store that rejects upserts of a chosen customer once it owns
    /// cards, standing in for a pipeline pass cut short mid-migration.
    struct FailingUpsertStore {
        inner: InMemoryCustomerStore,
        fail_id: String,
    }

    #[async_trait::async_trait]
    impl cardtrack_core::storage::CustomerStore for FailingUpsertStore {
        async fn get_customer(&self, customer_id: &str) -> cardtrack_core::Result<Option<Customer>> {
            self.inner.get_customer(customer_id).await
        }

        async fn upsert_customer(&self, customer: &Customer) -> cardtrack_core::Result<()> {
            if customer.id == self.fail_id && !customer.cards.is_empty() {
                return Err(TrackerError::Storage {
                    message: "write refused".to_string(),
                });
            }
            self.inner.upsert_customer(customer).await
        }

        async fn delete_customer(&self, customer_id: &str) -> cardtrack_core::Result<()> {
            self.inner.delete_customer(customer_id).await
        }

        async fn find_customer_with_tracking_id(
            &self,
            kind: TrackingIdKind,
            value: &str,
        ) -> cardtrack_core::Result<Option<Customer>> {
            self.inner.find_customer_with_tracking_id(kind, value).await
        }

        async fn all_customers(&self) -> cardtrack_core::Result<Vec<Customer>> {
            self.inner.all_customers().await
        }
    }

    #[tokio::test]
    async fn interrupted_migration_leaves_card_with_placeholder() {
        let store = Arc::new(FailingUpsertStore {
            inner: InMemoryCustomerStore::new(),
            fail_id: "CUST_1".to_string(),
        });
        let resolver = IdentityResolver::new(store.clone());

        let placeholder = resolver
            .resolve(&manufacturer_record("APP_001"), &manufacturer_template())
            .await
            .unwrap();
        let placeholder_id = placeholder.customer.id.clone();

        let err = resolver
            .resolve(&bank_record("CUST_1", "APP_001"), &bank_template())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Storage { .. }));

        // The migration never committed, so the card is still owned by
        // the placeholder and a retry can run the migration again.
        let parked = store.get_customer(&placeholder_id).await.unwrap().unwrap();
        assert_eq!(parked.cards.len(), 1);
    }

    #[tokio::test]
    async fn logistics_event_attaches_to_existing_card_by_tracking_number() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let resolver = IdentityResolver::new(store.clone());

        let mut resolution = resolver
            .resolve(&bank_record("CUST_1", "APP_001"), &bank_template())
            .await
            .unwrap();
        resolution.customer.cards[0]
            .tracking_ids
            .merge(TrackingIdKind::LogisticsTrackingNumber, Some("TRK_123"));
        store.upsert_customer(&resolution.customer).await.unwrap();

        let logistics = CanonicalRecord::Fulfillment(FulfillmentRecord {
            logistics_tracking_number: Some("TRK_123".to_string()),
            ..Default::default()
        });
        let resolved = resolver
            .resolve(&logistics, &logistics_template())
            .await
            .unwrap();
        assert!(!resolved.created_card);
        assert_eq!(resolved.customer.id, "CUST_1");
        assert_eq!(resolved.card_index, 0);
    }

    #[tokio::test]
    async fn missing_lookup_value_is_a_resolution_error() {
        let store = Arc::new(InMemoryCustomerStore::new());
        let resolver = IdentityResolver::new(store);

        let record = CanonicalRecord::Fulfillment(FulfillmentRecord::default());
        let err = resolver
            .resolve(&record, &logistics_template())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Resolution { .. }));
    }
}

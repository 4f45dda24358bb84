use crate::common::error::Result;
use crate::domain::{Customer, TrackingIdKind};
use crate::storage::traits::CustomerStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory customer store for development and testing.
pub struct InMemoryCustomerStore {
    customers: Arc<Mutex<HashMap<String, Customer>>>,
}

impl Default for InMemoryCustomerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self {
            customers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        let customers = self.customers.lock().unwrap();
        Ok(customers.get(customer_id).cloned())
    }

    async fn upsert_customer(&self, customer: &Customer) -> Result<()> {
        let mut customers = self.customers.lock().unwrap();
        let replaced = customers
            .insert(customer.id.clone(), customer.clone())
            .is_some();
        debug!(
            customer_id = %customer.id,
            replaced,
            cards = customer.cards.len(),
            "Upserted customer"
        );
        Ok(())
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        let mut customers = self.customers.lock().unwrap();
        customers.remove(customer_id);
        debug!(customer_id, "Deleted customer");
        Ok(())
    }

    async fn find_customer_with_tracking_id(
        &self,
        kind: TrackingIdKind,
        value: &str,
    ) -> Result<Option<Customer>> {
        let customers = self.customers.lock().unwrap();
        let found = customers
            .values()
            .find(|c| c.card_index_by_tracking_id(kind, value).is_some())
            .cloned();
        Ok(found)
    }

    async fn all_customers(&self) -> Result<Vec<Customer>> {
        let customers = self.customers.lock().unwrap();
        Ok(customers.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Card, CustomerInfo, TrackingIds};

    fn customer_with_card(customer_id: &str, application_id: &str) -> Customer {
        let mut customer = Customer::new(customer_id.to_string(), CustomerInfo::default());
        customer.cards.push(Card::new(
            format!("CARD_{application_id}"),
            TrackingIds {
                application_id: Some(application_id.to_string()),
                ..Default::default()
            },
        ));
        customer
    }

    #[tokio::test]
    async fn upsert_and_get_roundtrip() {
        let store = InMemoryCustomerStore::new();
        let customer = customer_with_card("CUST_1", "APP_001");
        store.upsert_customer(&customer).await.unwrap();

        let loaded = store.get_customer("CUST_1").await.unwrap().unwrap();
        assert_eq!(loaded.cards.len(), 1);
        assert!(store.get_customer("CUST_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_tracking_id_scans_all_cards() {
        let store = InMemoryCustomerStore::new();
        store
            .upsert_customer(&customer_with_card("CUST_1", "APP_001"))
            .await
            .unwrap();
        store
            .upsert_customer(&customer_with_card("CUST_2", "APP_002"))
            .await
            .unwrap();

        let found = store
            .find_customer_with_tracking_id(TrackingIdKind::ApplicationId, "APP_002")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "CUST_2");

        let missing = store
            .find_customer_with_tracking_id(TrackingIdKind::LogisticsTrackingNumber, "TRK_9")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn delete_removes_customer() {
        let store = InMemoryCustomerStore::new();
        store
            .upsert_customer(&customer_with_card("CUST_1", "APP_001"))
            .await
            .unwrap();
        store.delete_customer("CUST_1").await.unwrap();
        assert!(store.get_customer("CUST_1").await.unwrap().is_none());
    }
}

use crate::common::error::Result;
use crate::domain::{Customer, TrackingIdKind};
use async_trait::async_trait;

/// Document store keyed by customer id. The reconciliation engine
/// treats this as the sole source of truth; no other cache is assumed.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>>;

    /// Full replace / upsert by id.
    async fn upsert_customer(&self, customer: &Customer) -> Result<()>;

    async fn delete_customer(&self, customer_id: &str) -> Result<()>;

    /// Find the customer whose cards contain tracking-id field
    /// `kind` = `value`. Used by the identity resolver for non-bank
    /// providers.
    async fn find_customer_with_tracking_id(
        &self,
        kind: TrackingIdKind,
        value: &str,
    ) -> Result<Option<Customer>>;

    async fn all_customers(&self) -> Result<Vec<Customer>>;
}

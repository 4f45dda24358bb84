use crate::common::error::{Result, TrackerError};
use crate::domain::{Customer, TrackingIdKind};
use crate::storage::traits::CustomerStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Customer store backed by a local JSON state file. The whole state is
/// loaded on open and written back on `flush`; per-record I/O never
/// happens mid-batch.
pub struct JsonFileCustomerStore {
    path: PathBuf,
    customers: Mutex<HashMap<String, Customer>>,
}

impl JsonFileCustomerStore {
    /// Open the state file, starting empty if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let customers: HashMap<String, Customer> = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), customers = customers.len(), "Opened state file");
        Ok(Self {
            path,
            customers: Mutex::new(customers),
        })
    }

    /// Persist the current state back to the file.
    pub fn flush(&self) -> Result<()> {
        let customers = self.customers.lock().unwrap();
        let json = serde_json::to_string_pretty(&*customers)?;
        std::fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), customers = customers.len(), "Flushed state file");
        Ok(())
    }

    /// Delete the state file, if present. Returns whether a file existed.
    pub fn reset<P: AsRef<Path>>(path: P) -> Result<bool> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl CustomerStore for JsonFileCustomerStore {
    async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        let customers = self.customers.lock().unwrap();
        Ok(customers.get(customer_id).cloned())
    }

    async fn upsert_customer(&self, customer: &Customer) -> Result<()> {
        let mut customers = self.customers.lock().unwrap();
        customers.insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        let mut customers = self.customers.lock().unwrap();
        if customers.remove(customer_id).is_none() {
            return Err(TrackerError::Storage {
                message: format!("delete of unknown customer: {customer_id}"),
            });
        }
        Ok(())
    }

    async fn find_customer_with_tracking_id(
        &self,
        kind: TrackingIdKind,
        value: &str,
    ) -> Result<Option<Customer>> {
        let customers = self.customers.lock().unwrap();
        Ok(customers
            .values()
            .find(|c| c.card_index_by_tracking_id(kind, value).is_some())
            .cloned())
    }

    async fn all_customers(&self) -> Result<Vec<Customer>> {
        let customers = self.customers.lock().unwrap();
        Ok(customers.values().cloned().collect())
    }
}

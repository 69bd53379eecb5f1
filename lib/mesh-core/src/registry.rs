//! Service registry mapping service ids to their records

use crate::{CoreError, Result, ServiceRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// ServiceRegistry owns the id -> ServiceRecord directory.
///
/// Records are replaced whole on re-registration, so readers never observe a
/// partially written record.
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, ServiceRecord>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or overwrite a service, returning the stored id
    pub async fn register(&self, record: ServiceRecord) -> Result<String> {
        let id = record.id.clone();

        let mut services = self.services.write().await;
        let previous = services.insert(id.clone(), record);
        drop(services);

        if previous.is_some() {
            debug!(service_id = %id, "Re-registered service");
        } else {
            debug!(service_id = %id, "Registered service");
        }
        Ok(id)
    }

    /// Validate raw registration fields and register the resulting record.
    ///
    /// The directory is untouched when validation fails.
    pub async fn register_raw<I, S>(&self, id: &str, url: &str, scopes: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let record = ServiceRecord::new(id, url, scopes)?;
        self.register(record).await
    }

    /// Get a snapshot of the current record for a service
    pub async fn lookup(&self, id: &str) -> Result<ServiceRecord> {
        let services = self.services.read().await;
        services
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// Get count of registered services
    pub async fn service_count(&self) -> usize {
        let services = self.services.read().await;
        services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

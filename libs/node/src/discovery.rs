//! Service name to network address resolution.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::DiscoveryError;

#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    /// Resolve `service` to an address the transport can dial
    async fn find(&self, service: &str) -> Result<String, DiscoveryError>;
}

/// Fixed name to address table
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: RwLock<HashMap<String, String>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, service: impl Into<String>, address: impl Into<String>) -> Self {
        self.register(service, address);
        self
    }

    pub fn register(&self, service: impl Into<String>, address: impl Into<String>) {
        if let Ok(mut services) = self.services.write() {
            services.insert(service.into(), address.into());
        }
    }

    pub fn remove(&self, service: &str) -> Option<String> {
        self.services
            .write()
            .ok()
            .and_then(|mut services| services.remove(service))
    }
}

impl From<HashMap<String, String>> for StaticDiscovery {
    fn from(services: HashMap<String, String>) -> Self {
        Self {
            services: RwLock::new(services),
        }
    }
}

#[async_trait::async_trait]
impl Discovery for StaticDiscovery {
    async fn find(&self, service: &str) -> Result<String, DiscoveryError> {
        self.services
            .read()
            .map_err(|_| DiscoveryError::Custom("service table lock poisoned".to_string()))?
            .get(service)
            .cloned()
            .ok_or_else(|| DiscoveryError::ServiceNotRegistered(service.to_string()))
    }
}

//! Directory of network MIDI session peers found by the service browser.

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkService {
    pub name: String,
    /// Set once the browser resolved the advertisement.
    pub addresses: Option<Vec<SocketAddr>>,
}

impl NetworkService {
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.addresses.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// First resolved address, which is the one connections are made to.
    pub fn primary_address(&self) -> Option<SocketAddr> {
        self.addresses.as_ref().and_then(|a| a.first().copied())
    }
}

/// Shared between the notification drain and the session controller, so every
/// method takes `&self`.
#[derive(Debug, Default)]
pub struct ServiceDirectory {
    services: RwLock<HashMap<String, NetworkService>>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<NetworkService> {
        self.services.read().values().cloned().collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<NetworkService> {
        self.services.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Records a discovery. A service seen again keeps its resolved addresses.
    pub fn insert_found(&self, name: &str) {
        let mut services = self.services.write();
        if !services.contains_key(name) {
            info!("Discovered network session '{}'", name);
            services.insert(name.to_string(), NetworkService::unresolved(name));
        }
    }

    pub fn set_resolved(&self, name: &str, addresses: Vec<SocketAddr>) {
        debug!("Resolved network session '{}' to {:?}", name, addresses);
        let mut services = self.services.write();
        services
            .entry(name.to_string())
            .or_insert_with(|| NetworkService::unresolved(name))
            .addresses = Some(addresses);
    }

    pub fn remove(&self, name: &str) -> Option<NetworkService> {
        let removed = self.services.write().remove(name);
        if removed.is_some() {
            info!("Network session '{}' went away", name);
        }
        removed
    }

    /// Empties the directory, returning the names that were known.
    pub fn clear(&self) -> Vec<String> {
        self.services.write().drain().map(|(name, _)| name).collect()
    }
}

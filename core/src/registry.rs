//! Registry of real MIDI endpoints of one kind (sources or destinations).
//!
//! Entries keep their registration order. Name lookups return the first
//! endpoint registered under that name: two devices with the same display name
//! are indistinguishable through [`EndpointRegistry::find_by_name`], use
//! [`EndpointRegistry::find_by_descriptor`] when that matters.

use crate::endpoint::{Endpoint, EndpointDescriptor, EndpointHandle, EndpointKind};
use log::{debug, info, warn};

#[derive(Debug)]
pub struct EndpointRegistry {
    kind: EndpointKind,
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    pub fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            endpoints: Vec::new(),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn list(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    pub fn list_online_or_in_use(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.is_online_or_in_use())
            .cloned()
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.iter().find(|e| e.name == name).cloned()
    }

    pub fn find_by_descriptor(&self, descriptor: &EndpointDescriptor) -> Option<Endpoint> {
        self.endpoints
            .iter()
            .find(|e| &e.descriptor == descriptor)
            .cloned()
    }

    /// Registers an endpoint, or refreshes the existing entry with the same
    /// descriptor (replug under a new handle). The in-use flag of an existing
    /// entry survives the refresh.
    pub fn handle_added(&mut self, endpoint: Endpoint) {
        if endpoint.kind() != self.kind {
            warn!(
                "Ignoring {} '{}' registered in the {} registry",
                endpoint.kind(),
                endpoint.name,
                self.kind
            );
            return;
        }
        match self
            .endpoints
            .iter_mut()
            .find(|e| e.descriptor == endpoint.descriptor)
        {
            Some(existing) => {
                debug!(
                    "Refreshing {} '{}' ({:?} -> {:?})",
                    self.kind, endpoint.name, existing.handle, endpoint.handle
                );
                existing.name = endpoint.name;
                existing.handle = endpoint.handle;
                existing.online = endpoint.online;
                existing.in_use |= endpoint.in_use;
            }
            None => {
                info!("Registered {} '{}'", self.kind, endpoint.name);
                self.endpoints.push(endpoint);
            }
        }
    }

    /// Applies a platform removal. The handle is invalid from now on, so it is
    /// cleared; an endpoint still in use stays listed as offline, any other is
    /// dropped. Returns the descriptor of the affected entry.
    pub fn handle_removed(&mut self, handle: EndpointHandle) -> Option<EndpointDescriptor> {
        let index = self
            .endpoints
            .iter()
            .position(|e| e.handle == Some(handle))?;
        let entry = &mut self.endpoints[index];
        let descriptor = entry.descriptor.clone();
        if entry.in_use {
            info!("{} '{}' went offline (still in use)", self.kind, entry.name);
            entry.handle = None;
            entry.online = false;
        } else {
            info!("{} '{}' removed", self.kind, entry.name);
            self.endpoints.remove(index);
        }
        Some(descriptor)
    }

    /// Permanently forgets an endpoint regardless of its flags.
    pub fn remove(&mut self, descriptor: &EndpointDescriptor) -> Option<Endpoint> {
        let index = self
            .endpoints
            .iter()
            .position(|e| &e.descriptor == descriptor)?;
        Some(self.endpoints.remove(index))
    }

    /// Marks an endpoint as referenced (or no longer referenced) by a session.
    /// An offline endpoint that stops being in use is dropped.
    pub fn set_in_use(&mut self, descriptor: &EndpointDescriptor, in_use: bool) -> bool {
        let Some(index) = self
            .endpoints
            .iter()
            .position(|e| &e.descriptor == descriptor)
        else {
            return false;
        };
        self.endpoints[index].in_use = in_use;
        if !in_use && !self.endpoints[index].online {
            debug!("Dropping offline {} '{}'", self.kind, self.endpoints[index].name);
            self.endpoints.remove(index);
        }
        true
    }

    /// Replaces the whole content with a fresh platform snapshot, keeping
    /// offline entries that are still in use.
    pub fn replace_all(&mut self, snapshot: Vec<Endpoint>) {
        let previous = std::mem::take(&mut self.endpoints);
        for endpoint in snapshot {
            self.handle_added(endpoint);
        }
        for old in previous {
            if let Some(current) = self
                .endpoints
                .iter_mut()
                .find(|e| e.descriptor == old.descriptor)
            {
                current.in_use = old.in_use;
            } else if old.in_use {
                self.endpoints.push(Endpoint {
                    handle: None,
                    online: false,
                    ..old
                });
            }
        }
    }
}

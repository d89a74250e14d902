use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    Source,
    Destination,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Source => write!(f, "source"),
            EndpointKind::Destination => write!(f, "destination"),
        }
    }
}

/// Transient platform handle of an endpoint. Only valid while the device is
/// present; a replugged device usually comes back under a different handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointHandle(pub u64);

/// Stable identity of an endpoint, independent of its handle.
///
/// Equality is by value, so a descriptor saved before a device was unplugged
/// still finds the endpoint after it comes back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub kind: EndpointKind,
    pub manufacturer: String,
    pub model: String,
    pub unique_id: String,
}

impl EndpointDescriptor {
    pub fn new(
        kind: EndpointKind,
        manufacturer: impl Into<String>,
        model: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            manufacturer: manufacturer.into(),
            model: model.into(),
            unique_id: unique_id.into(),
        }
    }
}

/// A real MIDI source or destination as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub descriptor: EndpointDescriptor,
    /// Display name reported by the platform.
    pub name: String,
    /// `None` while the device is absent.
    pub handle: Option<EndpointHandle>,
    pub online: bool,
    pub in_use: bool,
}

impl Endpoint {
    /// An endpoint that the platform just reported as present.
    pub fn online(descriptor: EndpointDescriptor, name: impl Into<String>, handle: EndpointHandle) -> Self {
        Self {
            descriptor,
            name: name.into(),
            handle: Some(handle),
            online: true,
            in_use: false,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.descriptor.kind
    }

    pub fn is_online_or_in_use(&self) -> bool {
        self.online || self.in_use
    }
}

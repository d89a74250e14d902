//! Seams to the platform services the manager wraps. Everything behind these
//! traits (MIDI drivers, mDNS, session sockets) is provided by other crates.

use crate::endpoint::{EndpointDescriptor, EndpointHandle};
use crate::error::Result;
use crate::event_bus::EventSender;
use async_trait::async_trait;
use std::net::SocketAddr;

/// Native MIDI subsystem: enumerates endpoints and reports hot-plug changes.
pub trait MidiSubsystem: Send {
    /// Starts delivering [`crate::event_bus::MidiNotification`]s into `events`.
    fn subscribe(&mut self, events: EventSender) -> Result<()>;

    /// Stops notification delivery and releases the platform client.
    fn unsubscribe(&mut self) {}

    fn sources(&self) -> Vec<EndpointHandle>;

    fn destinations(&self) -> Vec<EndpointHandle>;

    fn display_name(&self, handle: EndpointHandle) -> Option<String>;

    /// `None` if the handle is no longer valid.
    fn descriptor(&self, handle: EndpointHandle) -> Option<EndpointDescriptor>;
}

/// DNS-SD style service browser.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Starts browsing for `service_type`, publishing
    /// [`crate::event_bus::DiscoveryEvent`]s into `events`.
    fn browse(&self, service_type: &str, events: EventSender) -> Result<()>;

    fn stop_browse(&self, service_type: &str) -> Result<()>;

    /// Waits until the named service has addresses. Never times out on its
    /// own; callers bound it.
    async fn resolve(&self, name: &str) -> Result<Vec<SocketAddr>>;
}

/// Identifies one live transport-level connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Network MIDI session transport.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn connect(&self, service: &str, peer: SocketAddr) -> Result<ConnectionId>;

    async fn disconnect(&self, connection: ConnectionId) -> Result<()>;

    fn incoming_enabled(&self) -> bool;

    fn set_incoming_enabled(&self, enabled: bool);

    fn session_enabled(&self) -> bool;

    async fn set_session_enabled(&self, enabled: bool) -> Result<()>;
}

// Ordered notification channel between platform callbacks and the manager.

use crate::endpoint::{EndpointHandle, EndpointKind};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Device add/remove notification from the native MIDI subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum MidiNotification {
    Added {
        kind: EndpointKind,
        handle: EndpointHandle,
    },
    Removed {
        kind: EndpointKind,
        handle: EndpointHandle,
    },
}

/// Notification from the network service browser. Names are service
/// instance names ("Studio"), not full DNS-SD names.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    Found(String),
    Resolved {
        name: String,
        addresses: Vec<SocketAddr>,
    },
    Removed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Midi(MidiNotification),
    Discovery(DiscoveryEvent),
}

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Both collaborators publish into the same channel, so the owner sees
/// notifications in delivery order across kinds.
pub struct EventBus {
    pub sender: EventSender,
    pub receiver: EventReceiver,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

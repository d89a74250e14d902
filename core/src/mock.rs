//! In-memory collaborators for tests and dependency injection.
//!
//! Each mock is a cheap `Clone` handle over shared state: hand one clone to
//! the manager and keep another to drive it from the test.

use crate::backend::{ConnectionId, MidiSubsystem, ServiceBrowser, SessionTransport};
use crate::endpoint::{EndpointDescriptor, EndpointHandle, EndpointKind};
use crate::error::{Error, Result};
use crate::event_bus::{DiscoveryEvent, Event, EventSender, MidiNotification};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct SubsystemState {
    next_handle: u64,
    endpoints: Vec<(EndpointHandle, EndpointDescriptor, String)>,
    events: Option<EventSender>,
    subscribed: bool,
}

#[derive(Clone, Default)]
pub struct MockSubsystem {
    state: Arc<Mutex<SubsystemState>>,
}

impl MockSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugs in a device and notifies subscribers.
    pub fn plug(&self, descriptor: EndpointDescriptor, name: &str) -> EndpointHandle {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = EndpointHandle(state.next_handle);
        let kind = descriptor.kind;
        state.endpoints.push((handle, descriptor, name.to_string()));
        if let Some(events) = &state.events {
            let _ = events.send(Event::Midi(MidiNotification::Added { kind, handle }));
        }
        handle
    }

    /// Unplugs a device and notifies subscribers.
    pub fn unplug(&self, handle: EndpointHandle) {
        let mut state = self.state.lock();
        let Some(index) = state.endpoints.iter().position(|(h, _, _)| *h == handle) else {
            return;
        };
        let (_, descriptor, _) = state.endpoints.remove(index);
        if let Some(events) = &state.events {
            let _ = events.send(Event::Midi(MidiNotification::Removed {
                kind: descriptor.kind,
                handle,
            }));
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscribed
    }

    fn handles(&self, kind: EndpointKind) -> Vec<EndpointHandle> {
        self.state
            .lock()
            .endpoints
            .iter()
            .filter(|(_, d, _)| d.kind == kind)
            .map(|(h, _, _)| *h)
            .collect()
    }
}

impl MidiSubsystem for MockSubsystem {
    fn subscribe(&mut self, events: EventSender) -> Result<()> {
        let mut state = self.state.lock();
        state.events = Some(events);
        state.subscribed = true;
        Ok(())
    }

    fn unsubscribe(&mut self) {
        let mut state = self.state.lock();
        state.events = None;
        state.subscribed = false;
    }

    fn sources(&self) -> Vec<EndpointHandle> {
        self.handles(EndpointKind::Source)
    }

    fn destinations(&self) -> Vec<EndpointHandle> {
        self.handles(EndpointKind::Destination)
    }

    fn display_name(&self, handle: EndpointHandle) -> Option<String> {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|(h, _, _)| *h == handle)
            .map(|(_, _, name)| name.clone())
    }

    fn descriptor(&self, handle: EndpointHandle) -> Option<EndpointDescriptor> {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|(h, _, _)| *h == handle)
            .map(|(_, d, _)| d.clone())
    }
}

#[derive(Default)]
struct BrowserState {
    events: Option<EventSender>,
    browsing: Option<String>,
    browse_calls: usize,
    resolutions: HashMap<String, Vec<SocketAddr>>,
    resolve_delay: Duration,
}

#[derive(Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertises a service, as if the network browser had found it.
    pub fn announce(&self, name: &str) {
        if let Some(events) = &self.state.lock().events {
            let _ = events.send(Event::Discovery(DiscoveryEvent::Found(name.to_string())));
        }
    }

    /// Advertises a service together with its addresses.
    pub fn announce_resolved(&self, name: &str, addresses: Vec<SocketAddr>) {
        let mut state = self.state.lock();
        state.resolutions.insert(name.to_string(), addresses.clone());
        if let Some(events) = &state.events {
            let _ = events.send(Event::Discovery(DiscoveryEvent::Found(name.to_string())));
            let _ = events.send(Event::Discovery(DiscoveryEvent::Resolved {
                name: name.to_string(),
                addresses,
            }));
        }
    }

    pub fn withdraw(&self, name: &str) {
        let mut state = self.state.lock();
        state.resolutions.remove(name);
        if let Some(events) = &state.events {
            let _ = events.send(Event::Discovery(DiscoveryEvent::Removed(name.to_string())));
        }
    }

    /// What [`ServiceBrowser::resolve`] answers for `name`. Services without
    /// a resolution never resolve.
    pub fn set_resolution(&self, name: &str, addresses: Vec<SocketAddr>) {
        self.state
            .lock()
            .resolutions
            .insert(name.to_string(), addresses);
    }

    pub fn set_resolve_delay(&self, delay: Duration) {
        self.state.lock().resolve_delay = delay;
    }

    pub fn is_browsing(&self) -> bool {
        self.state.lock().browsing.is_some()
    }

    pub fn browse_calls(&self) -> usize {
        self.state.lock().browse_calls
    }
}

#[async_trait]
impl ServiceBrowser for MockBrowser {
    fn browse(&self, service_type: &str, events: EventSender) -> Result<()> {
        let mut state = self.state.lock();
        state.events = Some(events);
        state.browsing = Some(service_type.to_string());
        state.browse_calls += 1;
        Ok(())
    }

    fn stop_browse(&self, _service_type: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.browsing = None;
        state.events = None;
        Ok(())
    }

    async fn resolve(&self, name: &str) -> Result<Vec<SocketAddr>> {
        let delay = self.state.lock().resolve_delay;
        tokio::time::sleep(delay).await;
        let resolved = self.state.lock().resolutions.get(name).cloned();
        match resolved {
            Some(addresses) => Ok(addresses),
            None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct TransportState {
    refused: HashSet<SocketAddr>,
    open: HashMap<ConnectionId, SocketAddr>,
    peers: Vec<SocketAddr>,
    connect_delay: Duration,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
    next_id: Arc<AtomicU64>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    session_enabled: Arc<AtomicBool>,
    incoming_enabled: Arc<AtomicBool>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            connects: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
            session_enabled: Arc::new(AtomicBool::new(false)),
            incoming_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every connection attempt to `peer` fail.
    pub fn refuse(&self, peer: SocketAddr) {
        self.state.lock().refused.insert(peer);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Peers of every connect call so far, in call order.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.state.lock().peers.clone()
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn connect(&self, service: &str, peer: SocketAddr) -> Result<ConnectionId> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let mut state = self.state.lock();
            state.peers.push(peer);
            state.connect_delay
        };
        tokio::time::sleep(delay).await;
        let mut state = self.state.lock();
        if state.refused.contains(&peer) {
            return Err(Error::ConnectFailed {
                service: service.to_string(),
                reason: format!("{peer} refused the invitation"),
            });
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        state.open.insert(id, peer);
        Ok(id)
    }

    async fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.lock().open.remove(&connection);
        Ok(())
    }

    fn incoming_enabled(&self) -> bool {
        self.incoming_enabled.load(Ordering::SeqCst)
    }

    fn set_incoming_enabled(&self, enabled: bool) {
        self.incoming_enabled.store(enabled, Ordering::SeqCst);
    }

    fn session_enabled(&self) -> bool {
        self.session_enabled.load(Ordering::SeqCst)
    }

    async fn set_session_enabled(&self, enabled: bool) -> Result<()> {
        self.session_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

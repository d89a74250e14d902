//! MIDI manager: one context object that tracks the host's real MIDI
//! endpoints, discovers network MIDI sessions and manages connections to
//! them.
//!
//! Platform callbacks (hot-plug, service browsing) never touch the manager
//! directly. They publish into an ordered event bus that the owner drains with
//! [`MidiManager::process_notifications`] or [`MidiManager::pump_notifications`].

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub use midi_manager_core::{
    mock, DiscoveryEvent, Endpoint, EndpointDescriptor, EndpointHandle, EndpointKind,
    EndpointRegistry, Error, Event, EventBus, EventReceiver, EventSender, ManagerConfig,
    MidiNotification, MidiSubsystem, NetworkService, NoteNames, Result, ServiceBrowser,
    ServiceDirectory, SessionConnection, SessionController, SessionOrigin, SessionStatus,
    SessionTransport,
};
use network::{AppleMidiTransport, MdnsDiscovery};
use platform::MidirSubsystem;

/// The platform services a [`MidiManager`] runs on.
pub struct Backends {
    pub midi: Box<dyn MidiSubsystem>,
    pub browser: Arc<dyn ServiceBrowser>,
    pub transport: Arc<dyn SessionTransport>,
}

impl Backends {
    /// Host MIDI through midir, DNS-SD through mdns-sd and AppleMIDI sessions.
    pub fn system(config: &ManagerConfig) -> Result<Self> {
        let midi = MidirSubsystem::new(&config.client_name, config.poll_interval())?;
        let discovery = Arc::new(MdnsDiscovery::new()?);
        let mut transport = AppleMidiTransport::new(config);
        if config.advertise_session {
            transport = transport.with_advertiser(Arc::clone(&discovery));
        }
        Ok(Self {
            midi: Box::new(midi),
            browser: discovery,
            transport: Arc::new(transport),
        })
    }
}

pub struct MidiManager {
    config: ManagerConfig,
    midi: Box<dyn MidiSubsystem>,
    sources: EndpointRegistry,
    destinations: EndpointRegistry,
    directory: Arc<ServiceDirectory>,
    browser: Arc<dyn ServiceBrowser>,
    sessions: Arc<SessionController>,
    events: EventSender,
    receiver: EventReceiver,
    browsing: bool,
    notifications_enabled: bool,
    note_names: NoteNames,
}

impl MidiManager {
    /// Subscribes to the MIDI subsystem and takes the initial endpoint
    /// snapshot. Notifications start enabled; browsing does not start until
    /// [`MidiManager::start_browsing`].
    pub fn init(config: ManagerConfig, backends: Backends) -> Result<Self> {
        let Backends {
            mut midi,
            browser,
            transport,
        } = backends;
        let EventBus { sender, receiver } = EventBus::new();
        midi.subscribe(sender.clone())?;

        let directory = Arc::new(ServiceDirectory::new());
        let sessions = Arc::new(SessionController::new(
            transport,
            Arc::clone(&browser),
            Arc::clone(&directory),
            config.resolve_timeout(),
        ));

        let mut manager = Self {
            config,
            midi,
            sources: EndpointRegistry::new(EndpointKind::Source),
            destinations: EndpointRegistry::new(EndpointKind::Destination),
            directory,
            browser,
            sessions,
            events: sender,
            receiver,
            browsing: false,
            notifications_enabled: true,
            note_names: NoteNames::new(),
        };
        manager.take_snapshot();
        info!(
            "MIDI manager '{}' ready: {} sources, {} destinations",
            manager.config.client_name,
            manager.sources.len(),
            manager.destinations.len()
        );
        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn take_snapshot(&mut self) {
        let sources = self.snapshot_of(EndpointKind::Source);
        let destinations = self.snapshot_of(EndpointKind::Destination);
        self.sources.replace_all(sources);
        self.destinations.replace_all(destinations);
    }

    fn snapshot_of(&self, kind: EndpointKind) -> Vec<Endpoint> {
        let handles = match kind {
            EndpointKind::Source => self.midi.sources(),
            EndpointKind::Destination => self.midi.destinations(),
        };
        handles
            .into_iter()
            .filter_map(|handle| self.describe(handle))
            .collect()
    }

    fn describe(&self, handle: EndpointHandle) -> Option<Endpoint> {
        let descriptor = self.midi.descriptor(handle)?;
        let name = self.midi.display_name(handle).unwrap_or_default();
        Some(Endpoint::online(descriptor, name, handle))
    }

    fn registry_mut(&mut self, kind: EndpointKind) -> &mut EndpointRegistry {
        match kind {
            EndpointKind::Source => &mut self.sources,
            EndpointKind::Destination => &mut self.destinations,
        }
    }

    // ---- Endpoints ----

    /// Reconciles a registry entry with the subsystem before it is handed
    /// out. A removal can still be queued on the bus (or held back while
    /// notifications are disabled), so a handle the subsystem no longer
    /// knows is reported as absent. The registry itself is left untouched.
    fn checked(&self, mut endpoint: Endpoint) -> Endpoint {
        if let Some(handle) = endpoint.handle {
            if self.midi.descriptor(handle).as_ref() != Some(&endpoint.descriptor) {
                debug!("{} '{}' lost its handle {:?}", endpoint.kind(), endpoint.name, handle);
                endpoint.handle = None;
                endpoint.online = false;
            }
        }
        endpoint
    }

    fn checked_all(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        endpoints.into_iter().map(|e| self.checked(e)).collect()
    }

    fn checked_online_or_in_use(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        endpoints
            .into_iter()
            .map(|e| self.checked(e))
            .filter(Endpoint::is_online_or_in_use)
            .collect()
    }

    pub fn real_sources(&self) -> Vec<Endpoint> {
        self.checked_all(self.sources.list())
    }

    pub fn real_sources_online_or_in_use(&self) -> Vec<Endpoint> {
        self.checked_online_or_in_use(self.sources.list_online_or_in_use())
    }

    /// First source registered under `name`; see [`EndpointRegistry`] for
    /// how duplicate names behave.
    pub fn real_source_with_name(&self, name: &str) -> Option<Endpoint> {
        self.sources.find_by_name(name).map(|e| self.checked(e))
    }

    pub fn real_source_with_descriptor(&self, descriptor: &EndpointDescriptor) -> Option<Endpoint> {
        self.sources
            .find_by_descriptor(descriptor)
            .map(|e| self.checked(e))
    }

    pub fn real_destinations(&self) -> Vec<Endpoint> {
        self.checked_all(self.destinations.list())
    }

    pub fn real_destinations_online_or_in_use(&self) -> Vec<Endpoint> {
        self.checked_online_or_in_use(self.destinations.list_online_or_in_use())
    }

    pub fn real_destination_with_name(&self, name: &str) -> Option<Endpoint> {
        self.destinations.find_by_name(name).map(|e| self.checked(e))
    }

    pub fn real_destination_with_descriptor(
        &self,
        descriptor: &EndpointDescriptor,
    ) -> Option<Endpoint> {
        self.destinations
            .find_by_descriptor(descriptor)
            .map(|e| self.checked(e))
    }

    /// Marks an endpoint as referenced by the application, which keeps it
    /// listed while its device is unplugged. Returns `false` for unknown
    /// descriptors.
    pub fn set_endpoint_in_use(&mut self, descriptor: &EndpointDescriptor, in_use: bool) -> bool {
        self.registry_mut(descriptor.kind).set_in_use(descriptor, in_use)
    }

    // ---- Notifications ----

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    /// Resumes applying notifications. Anything queued while disabled is
    /// applied, in order, by the next drain.
    pub fn enable_notifications(&mut self) {
        self.notifications_enabled = true;
    }

    /// Freezes the registries and directory at their current snapshot.
    /// Notifications keep queueing on the bus.
    pub fn disable_notifications(&mut self) {
        self.notifications_enabled = false;
    }

    /// Applies every queued notification without waiting. Returns how many
    /// were applied.
    pub fn process_notifications(&mut self) -> usize {
        if !self.notifications_enabled {
            return 0;
        }
        let mut applied = 0;
        while let Ok(event) = self.receiver.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Applies notifications as they arrive for `duration`.
    pub async fn pump_notifications(&mut self, duration: Duration) -> usize {
        if !self.notifications_enabled {
            tokio::time::sleep(duration).await;
            return 0;
        }
        let deadline = tokio::time::Instant::now() + duration;
        let mut applied = 0;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.receiver.recv()).await {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::Midi(MidiNotification::Added { kind, handle }) => match self.describe(handle) {
                Some(endpoint) => self.registry_mut(kind).handle_added(endpoint),
                None => warn!("Added {} {:?} vanished before it could be described", kind, handle),
            },
            Event::Midi(MidiNotification::Removed { kind, handle }) => {
                if self.registry_mut(kind).handle_removed(handle).is_none() {
                    debug!("Removal of unknown {} {:?} ignored", kind, handle);
                }
            }
            Event::Discovery(event) if !self.browsing => {
                debug!("Discovery event after browsing stopped: {:?}", event);
            }
            Event::Discovery(DiscoveryEvent::Found(name)) => self.directory.insert_found(&name),
            Event::Discovery(DiscoveryEvent::Resolved { name, addresses }) => {
                self.directory.set_resolved(&name, addresses)
            }
            Event::Discovery(DiscoveryEvent::Removed(name)) => {
                self.directory.remove(&name);
                self.sessions.forget_service(&name);
            }
        }
    }

    // ---- Network services ----

    pub fn is_browsing(&self) -> bool {
        self.browsing
    }

    /// Starts looking for network sessions. A no-op while already browsing.
    pub fn start_browsing(&mut self) -> Result<()> {
        if self.browsing {
            return Ok(());
        }
        self.browser.browse(&self.config.service_type, self.events.clone())?;
        self.browsing = true;
        info!("Browsing for {}", self.config.service_type);
        Ok(())
    }

    /// Stops browsing and forgets every discovered service. Live connections
    /// survive; pending attempts to discovered services are aborted.
    pub fn stop_browsing(&mut self) -> Result<()> {
        if !self.browsing {
            return Ok(());
        }
        self.browsing = false;
        self.browser.stop_browse(&self.config.service_type)?;
        for name in self.directory.clear() {
            self.sessions.forget_service(&name);
        }
        info!("Stopped browsing for {}", self.config.service_type);
        Ok(())
    }

    pub fn network_session_services(&self) -> Vec<NetworkService> {
        self.directory.list()
    }

    pub fn network_session_service_with_name(&self, name: &str) -> Option<NetworkService> {
        self.directory.find_by_name(name)
    }

    // ---- Sessions ----

    /// Shared handle on the controller, for driving connections from other
    /// tasks while the owner keeps draining notifications.
    pub fn session_controller(&self) -> Arc<SessionController> {
        Arc::clone(&self.sessions)
    }

    pub fn session_connections(&self) -> Vec<SessionConnection> {
        self.sessions.connections()
    }

    pub async fn connect(&self, name: &str) -> Result<()> {
        self.sessions.connect(name).await
    }

    pub async fn connect_manually(&self, name: &str, address: &str) -> Result<()> {
        self.sessions.connect_manually(name, address).await
    }

    pub async fn disconnect(&self, name: &str) -> Result<()> {
        self.sessions.disconnect(name).await
    }

    pub async fn toggle_connected(&self, name: &str) -> Result<()> {
        self.sessions.toggle_connected(name).await
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.sessions.is_connected(name)
    }

    pub fn any_connected(&self) -> bool {
        self.sessions.any_connected()
    }

    pub fn describe_connections(&self) -> String {
        self.sessions.describe_connections()
    }

    // ---- Local network session ----

    pub fn network_session_enabled(&self) -> bool {
        self.sessions.transport().session_enabled()
    }

    pub async fn enable_network_session(&self) -> Result<()> {
        self.sessions.transport().set_session_enabled(true).await
    }

    pub async fn disable_network_session(&self) -> Result<()> {
        self.sessions.transport().set_session_enabled(false).await
    }

    pub fn incoming_connections_enabled(&self) -> bool {
        self.sessions.transport().incoming_enabled()
    }

    pub fn enable_incoming_connections(&self) {
        self.sessions.transport().set_incoming_enabled(true);
    }

    pub fn disable_incoming_connections(&self) {
        self.sessions.transport().set_incoming_enabled(false);
    }

    // ---- Misc ----

    /// Scientific pitch name of a MIDI note number, `60` being `"C4"`.
    pub fn name_of_note(&self, note: i32) -> Result<&str> {
        self.note_names.name_of(note)
    }

    /// Disconnects every session, stops browsing and the local session, and
    /// releases the MIDI client.
    pub async fn shutdown(mut self) {
        self.sessions.disconnect_all().await;
        if let Err(e) = self.stop_browsing() {
            warn!("Failed to stop browsing: {}", e);
        }
        if self.network_session_enabled() {
            if let Err(e) = self.disable_network_session().await {
                warn!("Failed to disable the network session: {}", e);
            }
        }
        self.midi.unsubscribe();
        info!("MIDI manager '{}' shut down", self.config.client_name);
    }
}

impl Drop for MidiManager {
    fn drop(&mut self) {
        if self.browsing {
            if let Err(e) = self.browser.stop_browse(&self.config.service_type) {
                warn!("Failed to stop browsing on drop: {}", e);
            }
        }
        self.midi.unsubscribe();
    }
}

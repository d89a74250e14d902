//! Connection state machine for network MIDI session peers.
//!
//! Every tracked service is `Disconnected`, `Connecting` or `Connected`, and
//! only this controller moves it between those states. A connection attempt
//! covers both address resolution and the transport handshake; a `disconnect`
//! (or the service disappearing) while it is in flight aborts it and the
//! pending `connect` returns [`Error::Cancelled`]. Failed attempts are not
//! retried.

use crate::backend::{ConnectionId, ServiceBrowser, SessionTransport};
use crate::directory::ServiceDirectory;
use crate::error::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// How the peer address of a session was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionOrigin {
    Discovered,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConnection {
    pub service: String,
    pub status: SessionStatus,
    pub peer: Option<SocketAddr>,
    pub origin: SessionOrigin,
}

struct SessionEntry {
    connection: SessionConnection,
    attempt: u64,
    cancel: Option<watch::Sender<bool>>,
    link: Option<ConnectionId>,
}

impl SessionEntry {
    fn new(service: &str, origin: SessionOrigin) -> Self {
        Self {
            connection: SessionConnection {
                service: service.to_string(),
                status: SessionStatus::Disconnected,
                peer: None,
                origin,
            },
            attempt: 0,
            cancel: None,
            link: None,
        }
    }

    fn abort_attempt(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
        self.connection.status = SessionStatus::Disconnected;
        self.link = None;
    }
}

enum Begin {
    AlreadyConnected,
    Started {
        attempt: u64,
        cancel: watch::Receiver<bool>,
    },
}

pub struct SessionController {
    transport: Arc<dyn SessionTransport>,
    browser: Arc<dyn ServiceBrowser>,
    directory: Arc<ServiceDirectory>,
    resolve_timeout: Duration,
    sessions: Mutex<BTreeMap<String, SessionEntry>>,
    next_attempt: AtomicU64,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        browser: Arc<dyn ServiceBrowser>,
        directory: Arc<ServiceDirectory>,
        resolve_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            browser,
            directory,
            resolve_timeout,
            sessions: Mutex::new(BTreeMap::new()),
            next_attempt: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &Arc<dyn SessionTransport> {
        &self.transport
    }

    /// Connects to a discovered service, resolving its address first if the
    /// browser has not done so yet. A manual session that is no longer (or
    /// never was) advertised reconnects to its last known address.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let (origin, known_peer) = match self.manual_peer(name) {
            Some(peer) => (SessionOrigin::Manual, Some(peer)),
            None => match self.directory.find_by_name(name) {
                Some(service) => (SessionOrigin::Discovered, service.primary_address()),
                None => return Err(Error::NotFound(name.to_string())),
            },
        };
        let (attempt, cancel) = match self.begin_attempt(name, origin, known_peer)? {
            Begin::AlreadyConnected => return Ok(()),
            Begin::Started { attempt, cancel } => (attempt, cancel),
        };
        self.run_attempt(name, attempt, cancel, known_peer).await
    }

    /// Connects to `address` (`host:port`) without going through discovery.
    /// The address is validated before the transport is touched.
    pub async fn connect_manually(&self, name: &str, address: &str) -> Result<()> {
        let peer = parse_peer_address(address).await?;
        let (attempt, cancel) = match self.begin_attempt(name, SessionOrigin::Manual, Some(peer))? {
            Begin::AlreadyConnected => return Ok(()),
            Begin::Started { attempt, cancel } => (attempt, cancel),
        };
        self.run_attempt(name, attempt, cancel, Some(peer)).await
    }

    /// Tears down a connected session or aborts a pending attempt. A no-op for
    /// sessions that are already disconnected or unknown.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let link = {
            let mut sessions = self.sessions.lock();
            let Some(entry) = sessions.get_mut(name) else {
                return Ok(());
            };
            let link = match entry.connection.status {
                SessionStatus::Disconnected => return Ok(()),
                SessionStatus::Connecting => {
                    info!("Aborting connection attempt to '{}'", name);
                    entry.abort_attempt();
                    None
                }
                SessionStatus::Connected => {
                    entry.connection.status = SessionStatus::Disconnected;
                    entry.link.take()
                }
            };
            self.prune(&mut sessions, name);
            link
        };
        if let Some(link) = link {
            info!("Disconnecting from '{}'", name);
            self.transport.disconnect(link).await?;
        }
        Ok(())
    }

    pub async fn toggle_connected(&self, name: &str) -> Result<()> {
        if self.is_connected(name) {
            self.disconnect(name).await
        } else {
            self.connect(name).await
        }
    }

    pub fn status(&self, name: &str) -> SessionStatus {
        self.sessions
            .lock()
            .get(name)
            .map(|e| e.connection.status)
            .unwrap_or(SessionStatus::Disconnected)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.status(name) == SessionStatus::Connected
    }

    pub fn any_connected(&self) -> bool {
        self.sessions
            .lock()
            .values()
            .any(|e| e.connection.status == SessionStatus::Connected)
    }

    /// Snapshot of every tracked session, ordered by service name.
    pub fn connections(&self) -> Vec<SessionConnection> {
        self.sessions
            .lock()
            .values()
            .map(|e| e.connection.clone())
            .collect()
    }

    pub fn describe_connections(&self) -> String {
        let connections = self.connections();
        if connections.is_empty() {
            return "no network sessions".to_string();
        }
        connections
            .iter()
            .map(|c| match c.peer {
                Some(peer) => format!("{}: {} ({})", c.service, c.status, peer),
                None => format!("{}: {}", c.service, c.status),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Called when a discovered service goes away. A pending attempt is
    /// aborted; a live connection is kept until it is disconnected.
    pub fn forget_service(&self, name: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(name) {
            if entry.connection.status == SessionStatus::Connecting
                && entry.connection.origin == SessionOrigin::Discovered
            {
                info!("'{}' disappeared while connecting", name);
                entry.abort_attempt();
            }
        }
        self.prune(&mut sessions, name);
    }

    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.disconnect(&name).await {
                warn!("Failed to disconnect '{}': {}", name, e);
            }
        }
    }

    fn manual_peer(&self, name: &str) -> Option<SocketAddr> {
        self.sessions
            .lock()
            .get(name)
            .filter(|e| e.connection.origin == SessionOrigin::Manual)
            .and_then(|e| e.connection.peer)
    }

    /// Drops a disconnected discovered session whose service is gone.
    fn prune(&self, sessions: &mut BTreeMap<String, SessionEntry>, name: &str) {
        let drop_it = sessions.get(name).is_some_and(|e| {
            e.connection.status == SessionStatus::Disconnected
                && e.connection.origin == SessionOrigin::Discovered
                && self.directory.find_by_name(name).is_none()
        });
        if drop_it {
            debug!("No longer tracking session '{}'", name);
            sessions.remove(name);
        }
    }

    fn begin_attempt(
        &self,
        name: &str,
        origin: SessionOrigin,
        peer: Option<SocketAddr>,
    ) -> Result<Begin> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .entry(name.to_string())
            .or_insert_with(|| SessionEntry::new(name, origin));
        match entry.connection.status {
            SessionStatus::Connected => return Ok(Begin::AlreadyConnected),
            SessionStatus::Connecting => {
                return Err(Error::ConnectFailed {
                    service: name.to_string(),
                    reason: "a connection attempt is already in progress".to_string(),
                })
            }
            SessionStatus::Disconnected => {}
        }
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        entry.attempt = attempt;
        entry.cancel = Some(cancel_tx);
        entry.link = None;
        entry.connection.status = SessionStatus::Connecting;
        entry.connection.origin = origin;
        if peer.is_some() {
            entry.connection.peer = peer;
        }
        info!("Connecting to '{}'", name);
        Ok(Begin::Started {
            attempt,
            cancel: cancel_rx,
        })
    }

    async fn run_attempt(
        &self,
        name: &str,
        attempt: u64,
        mut cancel: watch::Receiver<bool>,
        known_peer: Option<SocketAddr>,
    ) -> Result<()> {
        let work = async {
            let peer = match known_peer {
                Some(peer) => peer,
                None => {
                    let peer = self.resolve(name).await?;
                    if let Some(entry) = self.sessions.lock().get_mut(name) {
                        if entry.attempt == attempt {
                            entry.connection.peer = Some(peer);
                        }
                    }
                    peer
                }
            };
            self.transport
                .connect(name, peer)
                .await
                .map_err(|e| match e {
                    Error::ConnectFailed { .. } => e,
                    other => Error::ConnectFailed {
                        service: name.to_string(),
                        reason: other.to_string(),
                    },
                })
        };
        let outcome = tokio::select! {
            result = work => result,
            // a dropped sender means the entry is gone, which is a cancellation too
            _ = async { let _ = cancel.wait_for(|cancelled| *cancelled).await; } => {
                Err(Error::Cancelled(name.to_string()))
            }
        };
        self.finish_attempt(name, attempt, outcome).await
    }

    async fn resolve(&self, name: &str) -> Result<SocketAddr> {
        let addresses = tokio::time::timeout(self.resolve_timeout, self.browser.resolve(name))
            .await
            .map_err(|_| Error::ResolutionTimeout(name.to_string()))??;
        let peer = addresses.first().copied().ok_or_else(|| Error::ConnectFailed {
            service: name.to_string(),
            reason: "service resolved without addresses".to_string(),
        })?;
        self.directory.set_resolved(name, addresses);
        Ok(peer)
    }

    async fn finish_attempt(
        &self,
        name: &str,
        attempt: u64,
        outcome: Result<ConnectionId>,
    ) -> Result<()> {
        let stale = {
            let mut sessions = self.sessions.lock();
            let current = sessions.get(name).is_some_and(|e| {
                e.attempt == attempt && e.connection.status == SessionStatus::Connecting
            });
            match (current, outcome) {
                (true, Ok(link)) => {
                    if let Some(entry) = sessions.get_mut(name) {
                        entry.connection.status = SessionStatus::Connected;
                        entry.cancel = None;
                        entry.link = Some(link);
                    }
                    info!("Connected to '{}'", name);
                    return Ok(());
                }
                (true, Err(e)) => {
                    if let Some(entry) = sessions.get_mut(name) {
                        entry.cancel = None;
                        entry.link = None;
                        entry.connection.status = SessionStatus::Disconnected;
                    }
                    warn!("Connection to '{}' failed: {}", name, e);
                    self.prune(&mut sessions, name);
                    return Err(e);
                }
                (false, Ok(link)) => link,
                (false, Err(_)) => return Err(Error::Cancelled(name.to_string())),
            }
        };
        // The handshake finished after the attempt was aborted.
        debug!("Tearing down late connection to '{}'", name);
        if let Err(e) = self.transport.disconnect(stale).await {
            warn!("Failed to tear down late connection to '{}': {}", name, e);
        }
        Err(Error::Cancelled(name.to_string()))
    }
}

/// Parses a `host:port` peer address, resolving host names.
pub async fn parse_peer_address(address: &str) -> Result<SocketAddr> {
    let invalid = || Error::InvalidAddress(address.to_string());
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return if addr.port() == 0 { Err(invalid()) } else { Ok(addr) };
    }
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    if host.is_empty() || port == 0 || host.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)
}

//! Network MIDI session transport speaking the AppleMIDI invitation protocol.
//!
//! Outgoing connections run the two-step handshake (control port, then data
//! port) from a pair of ephemeral sockets. While the local session is
//! enabled, a responder listens on `local_port`/`local_port + 1` and answers
//! invitations according to the incoming-connections switch. Clock
//! synchronisation and MIDI payload traffic are left to the peer stack.

use super::control_message::{Command, ControlMessage};
use crate::discovery::MdnsDiscovery;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, warn};
use midi_manager_core::{ConnectionId, Error, ManagerConfig, Result, SessionTransport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct OutgoingSession {
    service: String,
    peer: SocketAddr,
    initiator_token: u32,
    control: UdpSocket,
    data: UdpSocket,
}

struct Responder {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct AppleMidiTransport {
    local_name: String,
    local_port: u16,
    service_type: String,
    invitation_timeout: Duration,
    ssrc: u32,
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, OutgoingSession>>,
    incoming_enabled: Arc<AtomicBool>,
    incoming_peers: Arc<Mutex<HashMap<u32, SocketAddr>>>,
    responder: Mutex<Option<Responder>>,
    advertiser: Option<Arc<MdnsDiscovery>>,
    advertise_address: Option<IpAddr>,
}

impl AppleMidiTransport {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            local_name: config.local_session_name.clone(),
            local_port: config.local_port,
            service_type: config.service_type.clone(),
            invitation_timeout: config.invitation_timeout(),
            ssrc: rand::random(),
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            incoming_enabled: Arc::new(AtomicBool::new(false)),
            incoming_peers: Arc::new(Mutex::new(HashMap::new())),
            responder: Mutex::new(None),
            advertiser: None,
            advertise_address: config.advertise_address,
        }
    }

    /// Advertise the local session through `advertiser` while it is enabled.
    pub fn with_advertiser(mut self, advertiser: Arc<MdnsDiscovery>) -> Self {
        self.advertiser = Some(advertiser);
        self
    }

    /// Peers that joined the local session through its responder.
    pub fn incoming_peers(&self) -> Vec<SocketAddr> {
        self.incoming_peers.lock().values().copied().collect()
    }

    pub fn outgoing_peers(&self) -> Vec<(String, SocketAddr)> {
        self.connections
            .lock()
            .values()
            .map(|s| (s.service.clone(), s.peer))
            .collect()
    }

    fn advertised_ip(&self) -> IpAddr {
        self.advertise_address.unwrap_or_else(local_ip)
    }

    async fn bind_ephemeral(peer: &SocketAddr) -> Result<UdpSocket> {
        let wildcard = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        Ok(UdpSocket::bind(wildcard).await?)
    }

    async fn invite(
        &self,
        socket: &UdpSocket,
        service: &str,
        target: SocketAddr,
        initiator_token: u32,
    ) -> Result<()> {
        let invitation = ControlMessage::invitation(initiator_token, self.ssrc, &self.local_name);
        socket.send_to(&invitation.serialize(), target).await?;
        debug!("Sent invitation {:08x} to {}", initiator_token, target);
        let reply = tokio::time::timeout(
            self.invitation_timeout,
            await_reply(socket, initiator_token),
        )
        .await
        .map_err(|_| Error::ConnectFailed {
            service: service.to_string(),
            reason: format!("no answer from {target}"),
        })??;
        match reply.command {
            Command::InvitationAccepted => Ok(()),
            _ => Err(Error::ConnectFailed {
                service: service.to_string(),
                reason: format!("{target} rejected the invitation"),
            }),
        }
    }

    async fn start_responder(&self) -> Result<Responder> {
        let control = UdpSocket::bind(("0.0.0.0", self.local_port)).await?;
        let data = UdpSocket::bind(("0.0.0.0", self.local_port.wrapping_add(1))).await?;
        info!(
            "Network session '{}' listening on ports {} and {}",
            self.local_name,
            self.local_port,
            self.local_port.wrapping_add(1)
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = [(control, true), (data, false)]
            .into_iter()
            .map(|(socket, is_control)| {
                let listener = ResponderLoop {
                    socket,
                    is_control,
                    local_name: self.local_name.clone(),
                    ssrc: self.ssrc,
                    incoming_enabled: Arc::clone(&self.incoming_enabled),
                    incoming_peers: Arc::clone(&self.incoming_peers),
                };
                tokio::spawn(listener.run(shutdown_rx.clone()))
            })
            .collect();
        Ok(Responder { shutdown, tasks })
    }

    fn stop_responder(&self) {
        if let Some(responder) = self.responder.lock().take() {
            let _ = responder.shutdown.send(true);
            for task in responder.tasks {
                task.abort();
            }
            self.incoming_peers.lock().clear();
            info!("Network session '{}' stopped listening", self.local_name);
        }
    }
}

impl Drop for AppleMidiTransport {
    fn drop(&mut self) {
        self.stop_responder();
    }
}

/// Leaves the peer's control session with `BY` unless disarmed. Armed
/// between the control and data invitations, so a failed data step or a
/// dropped connect future does not leave the peer half-open.
struct HalfOpenGuard<'a> {
    control: &'a UdpSocket,
    peer: SocketAddr,
    exit: Option<Bytes>,
}

impl HalfOpenGuard<'_> {
    fn disarm(mut self) {
        self.exit = None;
    }
}

impl Drop for HalfOpenGuard<'_> {
    fn drop(&mut self) {
        if let Some(exit) = self.exit.take() {
            debug!("Leaving half-open session with {}", self.peer);
            if let Err(e) = self.control.try_send_to(&exit, self.peer) {
                warn!("Failed to leave half-open session with {}: {}", self.peer, e);
            }
        }
    }
}

/// Waits for the `OK`/`NO` answering the invitation with `initiator_token`,
/// skipping unrelated traffic.
async fn await_reply(socket: &UdpSocket, initiator_token: u32) -> Result<ControlMessage> {
    let mut buf = vec![0u8; 512];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        match ControlMessage::parse(&buf[..len]) {
            Ok(msg)
                if msg.initiator_token == initiator_token
                    && matches!(
                        msg.command,
                        Command::InvitationAccepted | Command::InvitationRejected
                    ) =>
            {
                return Ok(msg)
            }
            Ok(msg) => debug!("Ignoring {:?} from {}", msg.command, from),
            Err(e) => debug!("Ignoring packet from {}: {}", from, e),
        }
    }
}

/// Best guess at the address peers can reach us on: the source address the
/// OS would pick for a route to a public host. No packet is sent. Falls back
/// to loopback on hosts without such a route; set `advertise_address` there.
fn local_ip() -> IpAddr {
    StdUdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

struct ResponderLoop {
    socket: UdpSocket,
    is_control: bool,
    local_name: String,
    ssrc: u32,
    incoming_enabled: Arc<AtomicBool>,
    incoming_peers: Arc<Mutex<HashMap<u32, SocketAddr>>>,
}

impl ResponderLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; 512];
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, from)) => self.handle_packet(&buf[..len], from).await,
                        Err(e) => error!("Session responder receive error: {}", e),
                    }
                }
            }
        }
    }

    async fn handle_packet(&self, packet: &[u8], from: SocketAddr) {
        let msg = match ControlMessage::parse(packet) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Session responder ignoring packet from {}: {}", from, e);
                return;
            }
        };
        match msg.command {
            Command::Invitation => {
                let reply = if self.incoming_enabled.load(Ordering::SeqCst) {
                    if self.is_control {
                        info!(
                            "Accepting session invitation from '{}' at {}",
                            msg.name.as_deref().unwrap_or("?"),
                            from
                        );
                        self.incoming_peers.lock().insert(msg.ssrc, from);
                    }
                    ControlMessage::accepted(msg.initiator_token, self.ssrc, &self.local_name)
                } else {
                    info!("Rejecting session invitation from {} (incoming disabled)", from);
                    ControlMessage::rejected(msg.initiator_token, self.ssrc)
                };
                if let Err(e) = self.socket.send_to(&reply.serialize(), from).await {
                    error!("Failed to answer invitation from {}: {}", from, e);
                }
            }
            Command::Exit => {
                if self.incoming_peers.lock().remove(&msg.ssrc).is_some() {
                    info!("Peer at {} left the session", from);
                }
            }
            Command::InvitationAccepted | Command::InvitationRejected => {
                debug!("Unexpected {:?} from {}", msg.command, from);
            }
        }
    }
}

#[async_trait]
impl SessionTransport for AppleMidiTransport {
    async fn connect(&self, service: &str, peer: SocketAddr) -> Result<ConnectionId> {
        let control = Self::bind_ephemeral(&peer).await?;
        let data = Self::bind_ephemeral(&peer).await?;
        let initiator_token: u32 = rand::random();

        self.invite(&control, service, peer, initiator_token).await?;
        let half_open = HalfOpenGuard {
            control: &control,
            peer,
            exit: Some(ControlMessage::exit(initiator_token, self.ssrc).serialize()),
        };
        let data_peer = SocketAddr::new(peer.ip(), peer.port().wrapping_add(1));
        self.invite(&data, service, data_peer, initiator_token).await?;
        half_open.disarm();

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        info!("Session with '{}' at {} established", service, peer);
        self.connections.lock().insert(
            id,
            OutgoingSession {
                service: service.to_string(),
                peer,
                initiator_token,
                control,
                data,
            },
        );
        Ok(id)
    }

    async fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        let session = self.connections.lock().remove(&connection);
        let Some(session) = session else {
            warn!("Disconnect requested for unknown connection {:?}", connection);
            return Ok(());
        };
        let exit = ControlMessage::exit(session.initiator_token, self.ssrc).serialize();
        let data_peer = SocketAddr::new(session.peer.ip(), session.peer.port().wrapping_add(1));
        session.control.send_to(&exit, session.peer).await?;
        session.data.send_to(&exit, data_peer).await?;
        info!("Left session with '{}' at {}", session.service, session.peer);
        Ok(())
    }

    fn incoming_enabled(&self) -> bool {
        self.incoming_enabled.load(Ordering::SeqCst)
    }

    fn set_incoming_enabled(&self, enabled: bool) {
        info!(
            "Incoming session connections {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.incoming_enabled.store(enabled, Ordering::SeqCst);
    }

    fn session_enabled(&self) -> bool {
        self.responder.lock().is_some()
    }

    async fn set_session_enabled(&self, enabled: bool) -> Result<()> {
        if !enabled {
            self.stop_responder();
            if let Some(advertiser) = &self.advertiser {
                advertiser.withdraw_advertisement()?;
            }
            return Ok(());
        }
        if self.session_enabled() {
            return Ok(());
        }
        let responder = self.start_responder().await?;
        *self.responder.lock() = Some(responder);
        if let Some(advertiser) = &self.advertiser {
            advertiser.advertise(
                &self.service_type,
                &self.local_name,
                self.advertised_ip(),
                self.local_port,
            )?;
        }
        Ok(())
    }
}

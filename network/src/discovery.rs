use async_trait::async_trait;
use log::{debug, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use midi_manager_core::{DiscoveryEvent, Error, Event, EventSender, Result, ServiceBrowser};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use tokio::sync::watch;

/// DNS-SD browser and advertiser for network MIDI sessions, backed by the
/// `mdns-sd` daemon.
pub struct MdnsDiscovery {
    mdns: ServiceDaemon,
    resolved: Arc<Mutex<HashMap<String, Vec<SocketAddr>>>>,
    // bumped on every resolution so pending `resolve` calls re-check
    resolved_generation: Arc<watch::Sender<u64>>,
    advertised: Mutex<Option<String>>,
}

fn backend_error(e: mdns_sd::Error) -> Error {
    Error::Backend(format!("mDNS: {e}"))
}

/// "Studio._apple-midi._udp.local." -> "Studio"
pub fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(fullname)
        .to_string()
}

impl MdnsDiscovery {
    pub fn new() -> Result<Self> {
        let mdns = ServiceDaemon::new().map_err(backend_error)?;
        let (resolved_generation, _) = watch::channel(0);
        Ok(Self {
            mdns,
            resolved: Arc::new(Mutex::new(HashMap::new())),
            resolved_generation: Arc::new(resolved_generation),
            advertised: Mutex::new(None),
        })
    }

    /// Advertises the local session so that peers can find it.
    pub fn advertise(&self, service_type: &str, instance_name: &str, ip: IpAddr, port: u16) -> Result<()> {
        let host_name = format!("{}.local.", instance_name.replace(' ', "-"));
        let service_info = ServiceInfo::new(
            service_type,
            instance_name,
            &host_name,
            ip,
            port,
            HashMap::<String, String>::new(),
        )
        .map_err(backend_error)?;
        let fullname = service_info.get_fullname().to_string();
        self.mdns.register(service_info).map_err(backend_error)?;
        info!("mDNS: Registered {} on {}:{}", fullname, ip, port);
        *self.advertised.lock() = Some(fullname);
        Ok(())
    }

    pub fn withdraw_advertisement(&self) -> Result<()> {
        if let Some(fullname) = self.advertised.lock().take() {
            self.mdns.unregister(&fullname).map_err(backend_error)?;
            info!("mDNS: Unregistered {}", fullname);
        }
        Ok(())
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        let _ = self.withdraw_advertisement();
        let _ = self.mdns.shutdown();
    }
}

#[async_trait]
impl ServiceBrowser for MdnsDiscovery {
    fn browse(&self, service_type: &str, events: EventSender) -> Result<()> {
        let receiver = self.mdns.browse(service_type).map_err(backend_error)?;
        let service_type = service_type.to_string();
        let resolved = Arc::clone(&self.resolved);
        let generation = Arc::clone(&self.resolved_generation);
        thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                let forwarded = match event {
                    ServiceEvent::ServiceFound(_, fullname) => {
                        let name = instance_name(&fullname, &service_type);
                        debug!("mDNS: Found {}", name);
                        Some(DiscoveryEvent::Found(name))
                    }
                    ServiceEvent::ServiceResolved(info) => {
                        let name = instance_name(info.get_fullname(), &service_type);
                        let port = info.get_port();
                        let mut addresses: Vec<SocketAddr> = info
                            .get_addresses()
                            .iter()
                            .map(|ip| SocketAddr::new(*ip, port))
                            .collect();
                        // IPv4 first, it is what most peers listen on
                        addresses.sort_by_key(|a| (a.is_ipv6(), *a));
                        info!("mDNS: Resolved {} to {:?}", name, addresses);
                        resolved.lock().insert(name.clone(), addresses.clone());
                        generation.send_modify(|g| *g += 1);
                        Some(DiscoveryEvent::Resolved { name, addresses })
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        let name = instance_name(&fullname, &service_type);
                        info!("mDNS: Service removed: {}", name);
                        resolved.lock().remove(&name);
                        Some(DiscoveryEvent::Removed(name))
                    }
                    ServiceEvent::SearchStopped(_) => break,
                    _ => None,
                };
                if let Some(event) = forwarded {
                    if events.send(Event::Discovery(event)).is_err() {
                        warn!("mDNS: Event receiver gone, stopping browse thread");
                        break;
                    }
                }
            }
            debug!("mDNS: Browse thread for {} finished", service_type);
        });
        Ok(())
    }

    fn stop_browse(&self, service_type: &str) -> Result<()> {
        self.mdns.stop_browse(service_type).map_err(backend_error)?;
        self.resolved.lock().clear();
        Ok(())
    }

    async fn resolve(&self, name: &str) -> Result<Vec<SocketAddr>> {
        let mut changes = self.resolved_generation.subscribe();
        loop {
            let cached = self.resolved.lock().get(name).cloned();
            if let Some(addresses) = cached {
                return Ok(addresses);
            }
            if changes.changed().await.is_err() {
                return Err(Error::Backend("mDNS daemon stopped".to_string()));
            }
        }
    }
}

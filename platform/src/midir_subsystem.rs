use log::{debug, error, info};
use midi_manager_core::{
    EndpointDescriptor, EndpointHandle, EndpointKind, Error, Event, EventSender, MidiNotification,
    MidiSubsystem, Result,
};
use midir::{MidiInput, MidiOutput};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One port as seen by a single scan of the MIDI subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSnapshot {
    pub kind: EndpointKind,
    /// Backend port id, stable for as long as the device stays plugged in.
    pub id: String,
    pub name: String,
}

#[derive(Default)]
struct PortTable {
    next_handle: u64,
    live: BTreeMap<EndpointHandle, PortSnapshot>,
}

impl PortTable {
    /// Reconciles the table with a fresh scan and returns the hot-plug
    /// notifications it implies, removals first. A renamed port is reported
    /// as removed and added again under a new handle, so the name behind a
    /// handle never changes.
    fn apply(&mut self, scan: Vec<PortSnapshot>) -> Vec<MidiNotification> {
        let mut notifications = Vec::new();

        let gone: Vec<EndpointHandle> = self
            .live
            .iter()
            .filter(|(_, known)| !scan.contains(known))
            .map(|(handle, _)| *handle)
            .collect();
        for handle in gone {
            if let Some(port) = self.live.remove(&handle) {
                notifications.push(MidiNotification::Removed { kind: port.kind, handle });
            }
        }

        for port in scan {
            if self.live.values().any(|known| *known == port) {
                continue;
            }
            self.next_handle += 1;
            let handle = EndpointHandle(self.next_handle);
            notifications.push(MidiNotification::Added { kind: port.kind, handle });
            self.live.insert(handle, port);
        }
        notifications
    }

    fn handles(&self, kind: EndpointKind) -> Vec<EndpointHandle> {
        self.live
            .iter()
            .filter(|(_, port)| port.kind == kind)
            .map(|(handle, _)| *handle)
            .collect()
    }
}

/// midir exposes neither manufacturer nor model, and the display name can
/// change while a device stays plugged in. The port id alone identifies it.
fn descriptor_of(port: &PortSnapshot) -> EndpointDescriptor {
    EndpointDescriptor::new(port.kind, "", "", port.id.clone())
}

fn backend_error(e: impl std::fmt::Display) -> Error {
    Error::Backend(format!("midir: {e}"))
}

fn open_clients(client_name: &str) -> Result<(MidiInput, MidiOutput)> {
    let input = MidiInput::new(&format!("{client_name} input")).map_err(backend_error)?;
    let output = MidiOutput::new(&format!("{client_name} output")).map_err(backend_error)?;
    Ok((input, output))
}

fn scan(input: &MidiInput, output: &MidiOutput) -> Vec<PortSnapshot> {
    let mut ports = Vec::new();
    for port in input.ports() {
        match input.port_name(&port) {
            Ok(name) => ports.push(PortSnapshot {
                kind: EndpointKind::Source,
                id: port.id(),
                name,
            }),
            Err(e) => debug!("Skipping input port {}: {}", port.id(), e),
        }
    }
    for port in output.ports() {
        match output.port_name(&port) {
            Ok(name) => ports.push(PortSnapshot {
                kind: EndpointKind::Destination,
                id: port.id(),
                name,
            }),
            Err(e) => debug!("Skipping output port {}: {}", port.id(), e),
        }
    }
    ports
}

/// [`MidiSubsystem`] over the host MIDI API via `midir`.
///
/// `midir` has no hot-plug callbacks, so while subscribed a background thread
/// rescans the port lists every poll interval and turns the differences into
/// notifications. Every appearance of a port gets a fresh handle; the port id
/// is reported as the descriptor's unique id so a replugged device is still
/// recognised.
pub struct MidirSubsystem {
    client_name: String,
    poll_interval: Duration,
    table: Arc<Mutex<PortTable>>,
    stop: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
}

impl MidirSubsystem {
    pub fn new(client_name: &str, poll_interval: Duration) -> Result<Self> {
        let (input, output) = open_clients(client_name)?;
        let mut table = PortTable::default();
        table.apply(scan(&input, &output));
        info!(
            "MIDI subsystem ready: {} sources, {} destinations",
            table.handles(EndpointKind::Source).len(),
            table.handles(EndpointKind::Destination).len()
        );
        Ok(Self {
            client_name: client_name.to_string(),
            poll_interval,
            table: Arc::new(Mutex::new(table)),
            stop: Arc::new(AtomicBool::new(false)),
            poller: None,
        })
    }

    fn port(&self, handle: EndpointHandle) -> Option<PortSnapshot> {
        self.table.lock().live.get(&handle).cloned()
    }
}

impl MidiSubsystem for MidirSubsystem {
    fn subscribe(&mut self, events: EventSender) -> Result<()> {
        self.unsubscribe();
        self.stop.store(false, Ordering::SeqCst);

        let client_name = self.client_name.clone();
        let interval = self.poll_interval;
        let table = Arc::clone(&self.table);
        let stop = Arc::clone(&self.stop);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let poller = thread::Builder::new()
            .name("midi-port-poller".to_string())
            .spawn(move || {
                let (input, output) = match open_clients(&client_name) {
                    Ok(clients) => {
                        let _ = ready_tx.send(Ok(()));
                        clients
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while !stop.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let ports = scan(&input, &output);
                    let notifications = table.lock().apply(ports);
                    for notification in notifications {
                        debug!("MIDI hot-plug: {:?}", notification);
                        if events.send(Event::Midi(notification)).is_err() {
                            error!("Event receiver gone, stopping MIDI port poller");
                            return;
                        }
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.poller = Some(poller);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = poller.join();
                Err(e)
            }
            Err(_) => Err(Error::Backend("MIDI port poller exited during start-up".to_string())),
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(poller) = self.poller.take() {
            self.stop.store(true, Ordering::SeqCst);
            if poller.join().is_err() {
                error!("MIDI port poller panicked");
            }
        }
    }

    fn sources(&self) -> Vec<EndpointHandle> {
        self.table.lock().handles(EndpointKind::Source)
    }

    fn destinations(&self) -> Vec<EndpointHandle> {
        self.table.lock().handles(EndpointKind::Destination)
    }

    fn display_name(&self, handle: EndpointHandle) -> Option<String> {
        self.port(handle).map(|port| port.name)
    }

    fn descriptor(&self, handle: EndpointHandle) -> Option<EndpointDescriptor> {
        self.port(handle).map(|port| descriptor_of(&port))
    }
}

impl Drop for MidirSubsystem {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(kind: EndpointKind, id: &str, name: &str) -> PortSnapshot {
        PortSnapshot {
            kind,
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_first_scan_adds_everything() {
        let mut table = PortTable::default();
        let notifications = table.apply(vec![
            port(EndpointKind::Source, "20:0", "Keystation"),
            port(EndpointKind::Destination, "20:0", "Keystation"),
        ]);
        assert_eq!(
            notifications,
            vec![
                MidiNotification::Added {
                    kind: EndpointKind::Source,
                    handle: EndpointHandle(1)
                },
                MidiNotification::Added {
                    kind: EndpointKind::Destination,
                    handle: EndpointHandle(2)
                },
            ]
        );
        assert_eq!(table.handles(EndpointKind::Source), vec![EndpointHandle(1)]);
        assert_eq!(table.handles(EndpointKind::Destination), vec![EndpointHandle(2)]);
    }

    #[test]
    fn test_unchanged_scan_is_quiet() {
        let mut table = PortTable::default();
        table.apply(vec![port(EndpointKind::Source, "20:0", "Keystation")]);
        let notifications = table.apply(vec![port(EndpointKind::Source, "20:0", "Keystation")]);
        assert!(notifications.is_empty());
    }

    #[test]
    fn test_unplug_then_replug_gets_new_handle() {
        let mut table = PortTable::default();
        table.apply(vec![port(EndpointKind::Source, "20:0", "Keystation")]);

        let removed = table.apply(Vec::new());
        assert_eq!(
            removed,
            vec![MidiNotification::Removed {
                kind: EndpointKind::Source,
                handle: EndpointHandle(1)
            }]
        );

        let added = table.apply(vec![port(EndpointKind::Source, "20:0", "Keystation")]);
        assert_eq!(
            added,
            vec![MidiNotification::Added {
                kind: EndpointKind::Source,
                handle: EndpointHandle(2)
            }]
        );
    }

    #[test]
    fn test_rename_is_reported_as_replug() {
        let mut table = PortTable::default();
        table.apply(vec![port(EndpointKind::Destination, "24:0", "Synth")]);
        let before = descriptor_of(&table.live[&EndpointHandle(1)]);

        let notifications = table.apply(vec![port(EndpointKind::Destination, "24:0", "Synth MIDI 1")]);
        assert_eq!(
            notifications,
            vec![
                MidiNotification::Removed {
                    kind: EndpointKind::Destination,
                    handle: EndpointHandle(1)
                },
                MidiNotification::Added {
                    kind: EndpointKind::Destination,
                    handle: EndpointHandle(2)
                },
            ]
        );
        assert!(!table.live.contains_key(&EndpointHandle(1)));
        let renamed = &table.live[&EndpointHandle(2)];
        assert_eq!(renamed.name, "Synth MIDI 1");
        assert_eq!(descriptor_of(renamed), before);
    }

    #[test]
    fn test_descriptor_ignores_display_name() {
        let a = descriptor_of(&port(EndpointKind::Source, "20:0", "Keystation"));
        let b = descriptor_of(&port(EndpointKind::Source, "20:0", "Keystation 49"));
        let other = descriptor_of(&port(EndpointKind::Source, "20:1", "Keystation"));
        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(a.unique_id, "20:0");
    }
}

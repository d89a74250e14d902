// tests/integration_tests.rs

use midi_manager_lib::mock::{MockBrowser, MockSubsystem, MockTransport};
use midi_manager_lib::{
    Backends, EndpointDescriptor, EndpointKind, Error, ManagerConfig, MidiManager, SessionStatus,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    midi: MockSubsystem,
    browser: MockBrowser,
    transport: MockTransport,
}

fn manager_with(config: ManagerConfig) -> (MidiManager, Rig) {
    let rig = Rig {
        midi: MockSubsystem::new(),
        browser: MockBrowser::new(),
        transport: MockTransport::new(),
    };
    let backends = Backends {
        midi: Box::new(rig.midi.clone()),
        browser: Arc::new(rig.browser.clone()),
        transport: Arc::new(rig.transport.clone()),
    };
    let manager = MidiManager::init(config, backends).expect("manager init");
    (manager, rig)
}

fn manager() -> (MidiManager, Rig) {
    manager_with(ManagerConfig::default())
}

fn source(model: &str, id: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(EndpointKind::Source, "Acme", model, id)
}

fn studio_addr() -> SocketAddr {
    "127.0.0.1:5004".parse().unwrap()
}

fn names(endpoints: &[midi_manager_lib::Endpoint]) -> Vec<String> {
    endpoints.iter().map(|e| e.name.clone()).collect()
}

#[test]
fn test_initial_snapshot_is_taken_on_init() {
    let midi = MockSubsystem::new();
    midi.plug(source("Keys", "1"), "Keys");
    midi.plug(
        EndpointDescriptor::new(EndpointKind::Destination, "Acme", "Synth", "2"),
        "Synth",
    );
    let backends = Backends {
        midi: Box::new(midi.clone()),
        browser: Arc::new(MockBrowser::new()),
        transport: Arc::new(MockTransport::new()),
    };
    let manager = MidiManager::init(ManagerConfig::default(), backends).unwrap();

    assert!(midi.is_subscribed());
    assert_eq!(names(&manager.real_sources()), vec!["Keys"]);
    assert_eq!(names(&manager.real_destinations()), vec!["Synth"]);
    assert!(manager.real_destination_with_name("Synth").is_some());
    assert!(manager.real_source_with_name("Synth").is_none());
}

#[test]
fn test_online_or_in_use_view() {
    let (mut manager, rig) = manager();
    let a = rig.midi.plug(source("A", "a"), "A");
    rig.midi.plug(source("B", "b"), "B");
    let c = rig.midi.plug(source("C", "c"), "C");
    manager.process_notifications();

    assert!(manager.set_endpoint_in_use(&source("C", "c"), true));
    rig.midi.unplug(a);
    rig.midi.unplug(c);
    manager.process_notifications();

    let visible = manager.real_sources_online_or_in_use();
    assert_eq!(names(&visible), vec!["B", "C"]);
    let c = &visible[1];
    assert!(!c.online);
    assert!(c.in_use);
    assert!(c.handle.is_none());
    assert!(manager.real_source_with_descriptor(&source("A", "a")).is_none());
}

#[test]
fn test_replugged_device_keeps_identity() {
    let (mut manager, rig) = manager();
    let keys = source("Keys", "k1");
    let first = rig.midi.plug(keys.clone(), "Keys");
    manager.process_notifications();
    manager.set_endpoint_in_use(&keys, true);

    rig.midi.unplug(first);
    manager.process_notifications();
    let offline = manager.real_source_with_descriptor(&keys).unwrap();
    assert!(!offline.online);

    let second = rig.midi.plug(keys.clone(), "Keys");
    manager.process_notifications();
    let back = manager.real_source_with_descriptor(&keys).unwrap();
    assert!(back.online);
    assert!(back.in_use);
    assert_eq!(back.handle, Some(second));
    assert_ne!(first, second);
    assert_eq!(manager.real_sources().len(), 1);
}

#[test]
fn test_unplugged_unused_device_disappears() {
    let (mut manager, rig) = manager();
    let handle = rig.midi.plug(source("Pad", "p"), "Pad");
    manager.process_notifications();
    assert!(manager.real_source_with_name("Pad").is_some());

    rig.midi.unplug(handle);
    manager.process_notifications();
    assert!(manager.real_source_with_name("Pad").is_none());
    assert!(manager.real_source_with_descriptor(&source("Pad", "p")).is_none());
}

#[test]
fn test_disabled_notifications_stay_queued() {
    let (mut manager, rig) = manager();
    manager.disable_notifications();
    let pad = rig.midi.plug(source("Pad", "p"), "Pad");
    rig.midi.plug(source("Keys", "k"), "Keys");
    rig.midi.unplug(pad);

    assert_eq!(manager.process_notifications(), 0);
    assert!(manager.real_sources().is_empty());

    manager.enable_notifications();
    assert_eq!(manager.process_notifications(), 3);
    assert_eq!(names(&manager.real_sources()), vec!["Keys"]);
}

#[test]
fn test_lookups_never_hand_out_a_stale_handle() {
    let (mut manager, rig) = manager();
    let keys = source("Keys", "k1");
    let handle = rig.midi.plug(keys.clone(), "Keys");
    manager.process_notifications();
    manager.disable_notifications();
    rig.midi.unplug(handle);

    let found = manager.real_source_with_descriptor(&keys).unwrap();
    assert_eq!(found.handle, None);
    assert!(!found.online);
    let by_name = manager.real_source_with_name("Keys").unwrap();
    assert_eq!(by_name.handle, None);
    assert!(manager.real_sources().iter().all(|e| e.handle.is_none()));
    assert!(manager.real_sources_online_or_in_use().is_empty());

    // the snapshot itself is untouched until notifications resume
    manager.enable_notifications();
    assert_eq!(manager.process_notifications(), 1);
    assert!(manager.real_source_with_descriptor(&keys).is_none());
}

#[test]
fn test_stale_in_use_endpoint_is_listed_offline() {
    let (mut manager, rig) = manager();
    let synth = EndpointDescriptor::new(EndpointKind::Destination, "Acme", "Synth", "s1");
    let handle = rig.midi.plug(synth.clone(), "Synth");
    manager.process_notifications();
    manager.set_endpoint_in_use(&synth, true);
    rig.midi.unplug(handle);

    let visible = manager.real_destinations_online_or_in_use();
    assert_eq!(names(&visible), vec!["Synth"]);
    assert!(!visible[0].online);
    assert!(visible[0].handle.is_none());
}

#[tokio::test]
async fn test_pump_applies_notifications_as_they_arrive() {
    let (mut manager, rig) = manager();
    let midi = rig.midi.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        midi.plug(source("Late", "l"), "Late");
    });
    let applied = manager.pump_notifications(Duration::from_millis(200)).await;
    assert_eq!(applied, 1);
    assert!(manager.real_source_with_name("Late").is_some());
}

#[test]
fn test_browsing_start_stop() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    manager.start_browsing().unwrap();
    assert_eq!(rig.browser.browse_calls(), 1);
    assert!(manager.is_browsing());

    rig.browser.announce_resolved("Studio", vec![studio_addr()]);
    rig.browser.announce("Laptop");
    manager.process_notifications();
    let studio = manager.network_session_service_with_name("Studio").unwrap();
    assert_eq!(studio.primary_address(), Some(studio_addr()));
    assert!(!manager
        .network_session_service_with_name("Laptop")
        .unwrap()
        .is_resolved());
    assert_eq!(manager.network_session_services().len(), 2);

    manager.stop_browsing().unwrap();
    assert!(!manager.is_browsing());
    assert!(!rig.browser.is_browsing());
    assert!(manager.network_session_services().is_empty());

    manager.start_browsing().unwrap();
    assert_eq!(rig.browser.browse_calls(), 2);
}

#[test]
fn test_withdrawn_service_leaves_directory() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    rig.browser.announce_resolved("Studio", vec![studio_addr()]);
    manager.process_notifications();
    rig.browser.withdraw("Studio");
    manager.process_notifications();
    assert!(manager.network_session_service_with_name("Studio").is_none());
}

#[tokio::test]
async fn test_connect_to_discovered_service() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    rig.browser.announce_resolved("Studio", vec![studio_addr()]);
    manager.process_notifications();

    manager.connect("Studio").await.unwrap();
    manager.connect("Studio").await.unwrap();
    assert!(manager.is_connected("Studio"));
    assert!(manager.any_connected());
    assert_eq!(rig.transport.connect_count(), 1);
    assert_eq!(rig.transport.peers(), vec![studio_addr()]);
    assert_eq!(
        manager.describe_connections(),
        "Studio: connected (127.0.0.1:5004)"
    );

    manager.toggle_connected("Studio").await.unwrap();
    assert!(!manager.is_connected("Studio"));
    manager.disconnect("Studio").await.unwrap();
    assert_eq!(rig.transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_slow_resolution_times_out() {
    let config = ManagerConfig {
        resolve_timeout_ms: 50,
        ..ManagerConfig::default()
    };
    let (mut manager, rig) = manager_with(config);
    manager.start_browsing().unwrap();
    rig.browser.announce("Studio");
    rig.browser.set_resolve_delay(Duration::from_secs(5));
    manager.process_notifications();

    let err = manager.connect("Studio").await.unwrap_err();
    assert!(matches!(err, Error::ResolutionTimeout(_)));
    assert_eq!(
        manager.session_controller().status("Studio"),
        SessionStatus::Disconnected
    );
    assert_eq!(rig.transport.connect_count(), 0);
}

#[tokio::test]
async fn test_service_loss_cancels_pending_connect() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    rig.browser.announce_resolved("Studio", vec![studio_addr()]);
    manager.process_notifications();
    rig.transport.set_connect_delay(Duration::from_secs(5));

    let controller = manager.session_controller();
    let attempt = tokio::spawn(async move { controller.connect("Studio").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        manager.session_controller().status("Studio"),
        SessionStatus::Connecting
    );

    rig.browser.withdraw("Studio");
    manager.process_notifications();

    let err = attempt.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(!manager.is_connected("Studio"));
    assert_eq!(rig.transport.open_connections(), 0);
}

#[tokio::test]
async fn test_stop_browsing_cancels_pending_connect() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    rig.browser.announce_resolved("Studio", vec![studio_addr()]);
    manager.process_notifications();
    rig.transport.set_connect_delay(Duration::from_secs(5));

    let controller = manager.session_controller();
    let attempt = tokio::spawn(async move { controller.connect("Studio").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.stop_browsing().unwrap();

    let err = attempt.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert_eq!(
        manager.session_controller().status("Studio"),
        SessionStatus::Disconnected
    );
    assert_eq!(rig.transport.open_connections(), 0);
}

#[tokio::test]
async fn test_connected_session_survives_stop_browsing() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    rig.browser.announce_resolved("Studio", vec![studio_addr()]);
    manager.process_notifications();
    manager.connect("Studio").await.unwrap();

    manager.stop_browsing().unwrap();
    assert!(manager.is_connected("Studio"));
    assert_eq!(manager.session_connections().len(), 1);
}

#[tokio::test]
async fn test_connect_errors() {
    let (manager, rig) = manager();
    let err = manager.connect("Nowhere").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = manager
        .connect_manually("Bad", "not an address")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));
    assert_eq!(rig.transport.connect_count(), 0);

    rig.transport.refuse(studio_addr());
    let err = manager
        .connect_manually("Studio", "127.0.0.1:5004")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectFailed { .. }));
    assert!(!manager.is_connected("Studio"));
}

#[tokio::test]
async fn test_manual_connection_without_discovery() {
    let (manager, rig) = manager();
    manager
        .connect_manually("Rack", "127.0.0.1:5006")
        .await
        .unwrap();
    assert!(manager.is_connected("Rack"));
    let connections = manager.session_connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].peer, Some("127.0.0.1:5006".parse().unwrap()));
    assert!(!rig.browser.is_browsing());
}

#[tokio::test]
async fn test_network_session_switches() {
    let (manager, rig) = manager();
    assert!(!manager.network_session_enabled());
    manager.enable_network_session().await.unwrap();
    assert!(manager.network_session_enabled());

    manager.enable_incoming_connections();
    assert!(manager.incoming_connections_enabled());
    manager.disable_incoming_connections();
    assert!(!manager.incoming_connections_enabled());

    manager.disable_network_session().await.unwrap();
    assert!(!manager.network_session_enabled());
    assert_eq!(rig.transport.connect_count(), 0);
}

#[test]
fn test_note_names() {
    let (manager, _rig) = manager();
    assert_eq!(manager.name_of_note(60).unwrap(), "C4");
    assert_eq!(manager.name_of_note(69).unwrap(), "A4");
    assert!(matches!(manager.name_of_note(128), Err(Error::OutOfRange(128))));
    assert!(matches!(manager.name_of_note(-1), Err(Error::OutOfRange(-1))));
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    rig.browser.announce_resolved("Studio", vec![studio_addr()]);
    manager.process_notifications();
    manager.connect("Studio").await.unwrap();
    manager.enable_network_session().await.unwrap();

    manager.shutdown().await;
    assert_eq!(rig.transport.open_connections(), 0);
    assert!(!rig.browser.is_browsing());
    assert!(!rig.midi.is_subscribed());
}

#[test]
fn test_drop_stops_browsing() {
    let (mut manager, rig) = manager();
    manager.start_browsing().unwrap();
    drop(manager);
    assert!(!rig.browser.is_browsing());
    assert!(!rig.midi.is_subscribed());
}

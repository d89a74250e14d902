//! Registry and session core of the MIDI manager: endpoint tracking, the
//! network service directory, the session connection state machine and the
//! traits through which platform services are reached.

pub mod backend;
pub mod config;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod event_bus;
pub mod mock;
pub mod note_names;
pub mod registry;
pub mod session;

pub use backend::{ConnectionId, MidiSubsystem, ServiceBrowser, SessionTransport};
pub use config::ManagerConfig;
pub use directory::{NetworkService, ServiceDirectory};
pub use endpoint::{Endpoint, EndpointDescriptor, EndpointHandle, EndpointKind};
pub use error::{Error, Result};
pub use event_bus::{DiscoveryEvent, Event, EventBus, EventReceiver, EventSender, MidiNotification};
pub use note_names::NoteNames;
pub use registry::EndpointRegistry;
pub use session::{SessionConnection, SessionController, SessionOrigin, SessionStatus};

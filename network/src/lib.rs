//! Network side of the MIDI manager: discovery of session peers over mDNS
//! and the session transport used to connect to them.

pub mod apple_midi;
pub mod discovery;

pub use apple_midi::AppleMidiTransport;
pub use discovery::MdnsDiscovery;

//! AppleMIDI session control: the wire messages and the transport built on them.

pub mod control_message;
pub mod transport;

pub use control_message::{Command, ControlMessage};
pub use transport::AppleMidiTransport;

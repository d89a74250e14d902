//! Native MIDI subsystem bindings.

pub mod midir_subsystem;

pub use midir_subsystem::{MidirSubsystem, PortSnapshot};

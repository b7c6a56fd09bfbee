//! Shared value types for the packet dispatch core.
//!
//! Kept dependency-free of `packetd-core` so both the core and any
//! subscriber crate (e.g. `packetd-classifier`) can depend on it without a
//! cycle.

pub mod application;
pub mod value;

pub use application::{Application, ApplicationTable};
pub use value::AttachmentValue;

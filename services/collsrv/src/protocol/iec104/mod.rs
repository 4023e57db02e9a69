//! IEC 60870-5-104 protocol engine
//!
//! Layered bottom-up: binary time codecs, the ASDU codec, APCI framing,
//! the link state machine and the per-device connection actor.

pub mod asdu;
pub mod device;
pub mod frame;
pub mod link;
pub mod time;

pub use device::{spawn, DeviceCommand, DeviceHandle};

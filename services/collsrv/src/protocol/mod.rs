//! Telecontrol protocol engines
//!
//! One submodule per wire protocol. The supervisor decides by the
//! device's `protocol` tag which engine (if any) to instantiate; only
//! IEC 60870-5-104 is implemented.

pub mod iec104;

/// Protocol tag handled by the IEC-104 engine
pub const IEC104: &str = "iec104";

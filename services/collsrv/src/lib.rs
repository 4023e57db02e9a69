//! Collection service library
//!
//! SCADA data acquisition over IEC 60870-5-104: per-device connection
//! actors polling remote terminal units, a measurement pipeline
//! normalizing samples into the realtime store, a supervisor reconciling
//! actors against the declared inventory, and an HTTP control plane.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod protocol;
pub mod supervisor;

pub use config::AppConfig;
pub use error::{CollSrvError, Result};
pub use gateway::{CommandGateway, RequestKind};
pub use supervisor::DeviceSupervisor;

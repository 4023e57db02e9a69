//! HTTP/JSON control plane
//!
//! CRUD over the inventory plus the interactive `device_call` /
//! `device_ctrl` endpoints. Inventory mutations publish change events as a
//! side effect of the typed layer, which is what the supervisor reconciles
//! against; this module never talks to the actors directly.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use routes::{build_router, AppState};

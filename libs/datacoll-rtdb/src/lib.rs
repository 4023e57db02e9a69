//! Realtime store abstraction for the data collection services
//!
//! The store is the source of truth for the device inventory and the
//! per-point time series, and carries the change bus every component
//! reconciles against. Two backends implement the same [`Rtdb`] trait:
//!
//! - [`RedisRtdb`]: production Redis backend (bb8 connection pool)
//! - [`MemoryRtdb`]: in-memory backend for tests and embedded runs
//!
//! [`Inventory`] is the typed layer on top: it owns the key schema,
//! the cascading deletes and the event publication rules.

pub mod error;
pub mod inventory;
pub mod keyspace;
pub mod memory_impl;
pub mod model;
pub mod redis_impl;
pub mod traits;

pub use error::{InventoryError, InventoryResult};
pub use inventory::Inventory;
pub use memory_impl::MemoryRtdb;
pub use redis_impl::RedisRtdb;
pub use traits::{BusMessage, Rtdb, Subscription};

//! Error handling for the collection service
//!
//! All engine failures are values of [`CollSrvError`]; nothing in the core
//! panics. The variants mirror the recovery policy: codec and inventory
//! misses are recovered in place, sequence/link/timeout errors cycle the
//! connection, gateway timeouts surface to the control-plane caller.

use datacoll_rtdb::InventoryError;
use thiserror::Error;

/// Collection service error type
#[derive(Error, Debug)]
pub enum CollSrvError {
    /// Malformed frame: wrong start byte, length mismatch, truncation,
    /// unknown type identifier
    #[error("bad frame format: {0}")]
    BadFormat(String),

    /// Structurally valid frame carrying a forbidden value
    #[error("bad frame value: {0}")]
    BadValue(String),

    /// Peer violated ssn/rsn/K/W discipline
    #[error("sequence error: {0}")]
    Sequence(String),

    /// T1 expiry or an on-demand operation wait expiry
    #[error("timeout: {0}")]
    Timeout(String),

    /// TCP reset, EOF, connect failure
    #[error("link error: {0}")]
    Link(String),

    /// Operation requires an established link
    #[error("not connected")]
    NotConnected,

    /// Binding/mapping lookup miss; not fatal, the frame is discarded
    #[error("inventory miss: {0}")]
    InventoryMiss(String),

    /// Control-plane request received no reply within the deadline
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Configuration-related errors
    #[error("config error: {0}")]
    Config(String),

    /// Realtime store access errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Data serialization and deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unknown entity id
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate entity id
    #[error("{0} already exists")]
    Conflict(String),

    /// Invalid request payload
    #[error("validation error: {0}")]
    Validation(String),

    /// General internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for the collection service
pub type Result<T> = std::result::Result<T, CollSrvError>;

impl From<std::io::Error> for CollSrvError {
    fn from(err: std::io::Error) -> Self {
        CollSrvError::Link(err.to_string())
    }
}

impl From<serde_json::Error> for CollSrvError {
    fn from(err: serde_json::Error) -> Self {
        CollSrvError::Serialization(format!("JSON error: {err}"))
    }
}

impl From<figment::Error> for CollSrvError {
    fn from(err: figment::Error) -> Self {
        CollSrvError::Config(err.to_string())
    }
}

impl From<anyhow::Error> for CollSrvError {
    fn from(err: anyhow::Error) -> Self {
        CollSrvError::Storage(err.to_string())
    }
}

impl From<InventoryError> for CollSrvError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NotFound(what) => CollSrvError::NotFound(what),
            InventoryError::Conflict(what) => CollSrvError::Conflict(what),
            InventoryError::Invalid(msg) => CollSrvError::Validation(msg),
            InventoryError::Store(e) => CollSrvError::Storage(e.to_string()),
        }
    }
}

impl CollSrvError {
    pub fn bad_format(msg: impl Into<String>) -> Self {
        CollSrvError::BadFormat(msg.into())
    }

    pub fn bad_value(msg: impl Into<String>) -> Self {
        CollSrvError::BadValue(msg.into())
    }

    pub fn sequence(msg: impl Into<String>) -> Self {
        CollSrvError::Sequence(msg.into())
    }

    pub fn link(msg: impl Into<String>) -> Self {
        CollSrvError::Link(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        CollSrvError::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CollSrvError::Internal(msg.into())
    }

    /// True when the connection must be cycled to recover
    pub fn closes_link(&self) -> bool {
        matches!(
            self,
            CollSrvError::Sequence(_) | CollSrvError::Link(_) | CollSrvError::Timeout(_)
        )
    }
}

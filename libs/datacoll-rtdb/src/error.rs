//! Inventory error types

use thiserror::Error;

/// Errors surfaced by the typed inventory layer
///
/// `NotFound` / `Conflict` carry the entity description shown to API
/// callers; everything else is a store failure.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type InventoryResult<T> = Result<T, InventoryError>;

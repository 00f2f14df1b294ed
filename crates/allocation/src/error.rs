//! Allocation errors.

use thiserror::Error;

/// Errors raised by allocation command handlers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// No product exists for the SKU.
    #[error("Invalid sku {0}")]
    InvalidSku(String),
}

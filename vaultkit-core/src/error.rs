//! Error types for the secure credential store.

use thiserror::Error;

use crate::status::{OsStatus, ServiceError};

/// Error domain reported for raw service-status failures.
pub const ERROR_DOMAIN: &str = "org.vaultkit.store";

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by store operations.
///
/// Sentinel service statuses are classified into their own variants so
/// callers can dispatch without comparing raw codes; every other non-success
/// status is passed through verbatim as [`StoreError::Status`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The payload could not be encoded or decoded.
    #[error("payload could not be serialized: {0}")]
    Serialization(String),

    /// No item exists for the requested key.
    #[error("item not found")]
    ItemNotFound,

    /// An item with the same key already exists (a lost insert race).
    #[error("duplicate item")]
    DuplicateItem,

    /// A protected item was accessed without a live authentication session.
    ///
    /// Soft signal by convention: callers may retry the operation after a
    /// successful prompt. The store never retries on its own.
    #[error("interaction not allowed")]
    InteractionNotAllowed,

    /// Any other non-success service status, passed through verbatim.
    #[error("{domain} status {code}: {}", .description.as_deref().unwrap_or("no detail"))]
    Status {
        /// Error domain string.
        domain: &'static str,
        /// Raw status code in the platform convention.
        code: i32,
        /// Optional human-readable detail from the service.
        description: Option<String>,
    },
}

impl StoreError {
    /// Classifies a service failure into the store's error taxonomy.
    #[must_use]
    pub fn from_service(err: ServiceError) -> Self {
        match err.status {
            OsStatus::ITEM_NOT_FOUND => Self::ItemNotFound,
            OsStatus::DUPLICATE_ITEM => Self::DuplicateItem,
            OsStatus::INTERACTION_NOT_ALLOWED => Self::InteractionNotAllowed,
            status => Self::Status {
                domain: ERROR_DOMAIN,
                code: status.code(),
                description: err.description,
            },
        }
    }
}

//! Status codes in the platform secure-item convention.
//!
//! Every secure item service primitive reports failures through a numeric
//! status. The numbering follows the platform keychain convention: `0` is
//! success and a handful of sentinel values classify the failures the store
//! engine dispatches on.

use std::fmt;

/// Raw status code returned by a secure item service primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsStatus(pub i32);

impl OsStatus {
    /// The operation completed.
    pub const SUCCESS: Self = Self(0);
    /// No item matched the query.
    pub const ITEM_NOT_FOUND: Self = Self(-25_300);
    /// An item with the same identity already exists.
    pub const DUPLICATE_ITEM: Self = Self(-25_299);
    /// The item is protected and authentication UI could not be presented.
    pub const INTERACTION_NOT_ALLOWED: Self = Self(-25_308);
    /// An underlying I/O operation failed.
    pub const IO: Self = Self(-36);
    /// Stored bytes could not be decoded by the service.
    pub const DECODE: Self = Self(-26_275);
    /// The query was malformed or missing a required attribute.
    pub const PARAM: Self = Self(-50);

    /// Returns the raw numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for OsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure returned by a secure item service primitive.
///
/// Carries the raw status verbatim; classification into the store's error
/// taxonomy happens at the store layer.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// Status code in the platform convention.
    pub status: OsStatus,
    /// Optional human-readable detail from the service.
    pub description: Option<String>,
}

impl ServiceError {
    /// Creates a failure carrying `status` with no detail.
    #[must_use]
    pub const fn new(status: OsStatus) -> Self {
        Self {
            status,
            description: None,
        }
    }

    /// Creates a failure carrying `status` and a human-readable detail.
    #[must_use]
    pub fn with_description(status: OsStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            description: Some(description.into()),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "status {}: {description}", self.status),
            None => write!(f, "status {}", self.status),
        }
    }
}

impl std::error::Error for ServiceError {}

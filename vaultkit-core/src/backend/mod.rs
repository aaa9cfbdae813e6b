//! The secure item service boundary and the shipped implementations.
//!
//! The platform secure store (OS keychain, credential manager, hardware
//! security module) is an external dependency. This module pins down the
//! primitive surface the store engine needs from it:
//!
//! - [`SecureItemService`] — copy/add/update/delete keyed by
//!   `(service, account)`
//! - [`MemoryItemService`] — in-memory implementation for tests
//! - [`EncryptedFileService`] — software-encrypted fallback for hosts
//!   without an OS secure store

mod file;
mod lock;
mod memory;

pub use file::EncryptedFileService;
pub use lock::{StoreLock, StoreLockGuard};
pub use memory::MemoryItemService;

use crate::auth::AuthToken;
use crate::query::{AuthenticationUi, ItemAttributes, ItemQuery};
use crate::status::{OsStatus, ServiceError};

/// Result of a successful lookup primitive.
#[derive(Debug, Clone, Default)]
pub struct ItemMatch {
    /// Stored attributes, present when the query requested them.
    pub attributes: Option<ItemAttributes>,
    /// Payload bytes, present when the query requested data.
    pub payload: Option<Vec<u8>>,
}

/// Platform secure-storage service: the external dependency boundary.
///
/// Implementations store opaque payloads keyed by `(service, account)` and
/// enforce the access rules encoded in each query:
///
/// - `add` on an existing identity fails with the duplicate-item status.
/// - `update`, `delete` and `copy_matching` on a missing identity fail with
///   the item-not-found status.
/// - Access to an item bound to an access-control policy requires a live
///   authenticated token; a probe with [`AuthenticationUi::Fail`] on such an
///   item always fails with interaction-not-allowed and never presents UI.
///
/// The shipped implementations are headless and never present authentication
/// UI themselves, so a protected item without a live authenticated token
/// resolves to interaction-not-allowed even when the query allows UI. An
/// OS-native implementation may prompt instead.
pub trait SecureItemService: Send + Sync {
    /// Resolves the item matching `query`.
    ///
    /// # Errors
    ///
    /// Fails with a [`ServiceError`] status when no item matches, access is
    /// not authorized, or the lookup itself fails.
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, ServiceError>;

    /// Inserts the new item described by `query`; the payload is required.
    ///
    /// # Errors
    ///
    /// Fails with the duplicate-item status when the identity already
    /// exists, or another status when the insert fails.
    fn add(&self, query: &ItemQuery) -> Result<(), ServiceError>;

    /// Replaces the payload of the item matching `query`.
    ///
    /// # Errors
    ///
    /// Fails with the item-not-found status when the identity is absent, or
    /// another status when access is denied or the write fails.
    fn update(&self, query: &ItemQuery, payload: &[u8]) -> Result<(), ServiceError>;

    /// Deletes the item matching `query`.
    ///
    /// # Errors
    ///
    /// Fails with the item-not-found status when the identity is absent, or
    /// another status when access is denied or the delete fails.
    fn delete(&self, query: &ItemQuery) -> Result<(), ServiceError>;
}

/// Applies the protected-item access rule shared by the shipped services.
pub(crate) fn check_protected_access(
    protected: bool,
    query: &ItemQuery,
) -> Result<(), ServiceError> {
    if !protected {
        return Ok(());
    }
    match query.authentication_ui {
        AuthenticationUi::Fail => {
            Err(ServiceError::new(OsStatus::INTERACTION_NOT_ALLOWED))
        }
        AuthenticationUi::Allow => {
            if query.auth_token.as_ref().is_some_and(AuthToken::is_valid) {
                Ok(())
            } else {
                Err(ServiceError::with_description(
                    OsStatus::INTERACTION_NOT_ALLOWED,
                    "no live authenticated session for protected item",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::AuthSession;
    use crate::query::AuthenticationUi;

    use super::*;

    fn protected_query(ui: AuthenticationUi, token: Option<AuthToken>) -> ItemQuery {
        let mut query = ItemQuery::new("org.example.store", "key");
        query.authentication_ui = ui;
        query.auth_token = token;
        query
    }

    #[test]
    fn unprotected_items_need_no_session() {
        let query = protected_query(AuthenticationUi::Fail, None);
        assert!(check_protected_access(false, &query).is_ok());
    }

    #[test]
    fn probe_on_protected_item_is_interaction_not_allowed() {
        let session = AuthSession::new();
        session.mark_authenticated();
        let query = protected_query(AuthenticationUi::Fail, Some(session.token()));
        let err = check_protected_access(true, &query).expect_err("no UI allowed");
        assert_eq!(err.status, OsStatus::INTERACTION_NOT_ALLOWED);
    }

    #[test]
    fn authenticated_token_authorizes_protected_access() {
        let session = AuthSession::new();
        session.mark_authenticated();
        let query = protected_query(AuthenticationUi::Allow, Some(session.token()));
        assert!(check_protected_access(true, &query).is_ok());
    }

    #[test]
    fn invalidated_token_is_rejected() {
        let mut session = AuthSession::new();
        session.mark_authenticated();
        let token = session.token();
        session.invalidate();
        let query = protected_query(AuthenticationUi::Allow, Some(token));
        let err = check_protected_access(true, &query).expect_err("stale session");
        assert_eq!(err.status, OsStatus::INTERACTION_NOT_ALLOWED);
    }
}

//! In-memory secure item service.
//!
//! **FOR TESTING ONLY** — payloads are held unencrypted in process memory.
//! It exists to exercise the store engine without a platform secure store.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::query::{AccessControl, Accessibility, ItemAttributes, ItemQuery};
use crate::status::{OsStatus, ServiceError};

use super::{check_protected_access, ItemMatch, SecureItemService};

/// Accessibility recorded when an insert does not specify one.
const DEFAULT_ACCESSIBILITY: Accessibility = Accessibility::WhenUnlocked;

#[derive(Debug, Clone)]
struct StoredItem {
    payload: Vec<u8>,
    accessibility: Accessibility,
    protected: bool,
}

/// In-memory implementation of [`SecureItemService`].
#[derive(Debug, Default)]
pub struct MemoryItemService {
    items: RwLock<HashMap<(String, String), StoredItem>>,
}

impl MemoryItemService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    ///
    /// # Panics
    ///
    /// Panics if the service state lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().expect("service state poisoned").len()
    }

    /// Whether the service holds no items.
    ///
    /// # Panics
    ///
    /// Panics if the service state lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().expect("service state poisoned").is_empty()
    }

    /// Removes every stored item (test isolation).
    ///
    /// # Panics
    ///
    /// Panics if the service state lock is poisoned.
    pub fn clear(&self) {
        self.items.write().expect("service state poisoned").clear();
    }

    fn poisoned() -> ServiceError {
        ServiceError::with_description(OsStatus::IO, "service state poisoned")
    }
}

fn identity(query: &ItemQuery) -> (String, String) {
    (query.service.clone(), query.account.clone())
}

impl SecureItemService for MemoryItemService {
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, ServiceError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        let Some(item) = items.get(&identity(query)) else {
            return Err(ServiceError::new(OsStatus::ITEM_NOT_FOUND));
        };
        check_protected_access(item.protected, query)?;
        let attributes = query.return_attributes.then(|| ItemAttributes {
            service: query.service.clone(),
            account: query.account.clone(),
            accessibility: item.accessibility,
            protected: item.protected,
        });
        let payload = query.return_data.then(|| item.payload.clone());
        Ok(ItemMatch {
            attributes,
            payload,
        })
    }

    fn add(&self, query: &ItemQuery) -> Result<(), ServiceError> {
        let Some(payload) = query.payload.as_deref() else {
            return Err(ServiceError::with_description(
                OsStatus::PARAM,
                "insert query carries no payload",
            ));
        };
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let key = identity(query);
        if items.contains_key(&key) {
            return Err(ServiceError::new(OsStatus::DUPLICATE_ITEM));
        }
        let accessibility = query.access_control.map_or_else(
            || query.accessibility.unwrap_or(DEFAULT_ACCESSIBILITY),
            AccessControl::accessibility,
        );
        items.insert(
            key,
            StoredItem {
                payload: payload.to_vec(),
                accessibility,
                protected: query
                    .access_control
                    .is_some_and(AccessControl::requires_user_presence),
            },
        );
        Ok(())
    }

    fn update(&self, query: &ItemQuery, payload: &[u8]) -> Result<(), ServiceError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let Some(item) = items.get_mut(&identity(query)) else {
            return Err(ServiceError::new(OsStatus::ITEM_NOT_FOUND));
        };
        check_protected_access(item.protected, query)?;
        item.payload = payload.to_vec();
        Ok(())
    }

    fn delete(&self, query: &ItemQuery) -> Result<(), ServiceError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let key = identity(query);
        let Some(item) = items.get(&key) else {
            return Err(ServiceError::new(OsStatus::ITEM_NOT_FOUND));
        };
        check_protected_access(item.protected, query)?;
        items.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::AuthSession;
    use crate::query::AuthenticationUi;

    use super::*;

    fn insert_query(account: &str, payload: &[u8]) -> ItemQuery {
        let mut query = ItemQuery::new("org.example.store", account);
        query.payload = Some(payload.to_vec());
        query
    }

    fn lookup_query(account: &str) -> ItemQuery {
        let mut query = ItemQuery::new("org.example.store", account);
        query.return_data = true;
        query.return_attributes = true;
        query
    }

    #[test]
    fn add_then_copy_round_trips() {
        let service = MemoryItemService::new();
        service.add(&insert_query("token", b"abc")).expect("add");

        let matched = service.copy_matching(&lookup_query("token")).expect("copy");
        assert_eq!(matched.payload.as_deref(), Some(&b"abc"[..]));
        let attributes = matched.attributes.expect("attributes requested");
        assert_eq!(attributes.account, "token");
        assert_eq!(attributes.accessibility, DEFAULT_ACCESSIBILITY);
        assert!(!attributes.protected);
    }

    #[test]
    fn missing_item_is_not_found() {
        let service = MemoryItemService::new();
        let err = service
            .copy_matching(&lookup_query("absent"))
            .expect_err("missing");
        assert_eq!(err.status, OsStatus::ITEM_NOT_FOUND);

        let err = service
            .update(&lookup_query("absent"), b"x")
            .expect_err("missing");
        assert_eq!(err.status, OsStatus::ITEM_NOT_FOUND);

        let err = service.delete(&lookup_query("absent")).expect_err("missing");
        assert_eq!(err.status, OsStatus::ITEM_NOT_FOUND);
    }

    #[test]
    fn double_add_is_a_duplicate() {
        let service = MemoryItemService::new();
        service.add(&insert_query("token", b"abc")).expect("add");
        let err = service
            .add(&insert_query("token", b"xyz"))
            .expect_err("duplicate");
        assert_eq!(err.status, OsStatus::DUPLICATE_ITEM);
        assert_eq!(service.len(), 1);
    }

    #[test]
    fn add_without_payload_is_rejected() {
        let service = MemoryItemService::new();
        let err = service
            .add(&ItemQuery::new("org.example.store", "token"))
            .expect_err("no payload");
        assert_eq!(err.status, OsStatus::PARAM);
    }

    #[test]
    fn update_replaces_the_payload() {
        let service = MemoryItemService::new();
        service.add(&insert_query("token", b"abc")).expect("add");
        service
            .update(&lookup_query("token"), b"xyz")
            .expect("update");
        let matched = service.copy_matching(&lookup_query("token")).expect("copy");
        assert_eq!(matched.payload.as_deref(), Some(&b"xyz"[..]));
    }

    #[test]
    fn delete_removes_the_item() {
        let service = MemoryItemService::new();
        service.add(&insert_query("token", b"abc")).expect("add");
        service.delete(&lookup_query("token")).expect("delete");
        assert!(service.is_empty());
    }

    #[test]
    fn items_are_scoped_by_service_label() {
        let service = MemoryItemService::new();
        service.add(&insert_query("token", b"abc")).expect("add");

        let mut other = lookup_query("token");
        other.service = "org.example.other".to_string();
        let err = service.copy_matching(&other).expect_err("other label");
        assert_eq!(err.status, OsStatus::ITEM_NOT_FOUND);
    }

    #[test]
    fn protected_item_requires_a_live_session() {
        let service = MemoryItemService::new();
        let mut query = insert_query("secret", b"abc");
        query.access_control = Some(
            AccessControl::user_presence(Accessibility::WhenPasscodeSetThisDeviceOnly)
                .expect("device-bound"),
        );
        service.add(&query).expect("add");

        // Probe path: UI disallowed, protected item.
        let mut probe = lookup_query("secret");
        probe.authentication_ui = AuthenticationUi::Fail;
        let err = service.copy_matching(&probe).expect_err("probe");
        assert_eq!(err.status, OsStatus::INTERACTION_NOT_ALLOWED);

        // UI allowed but no session.
        let err = service
            .copy_matching(&lookup_query("secret"))
            .expect_err("no session");
        assert_eq!(err.status, OsStatus::INTERACTION_NOT_ALLOWED);

        // Authenticated session authorizes the read.
        let session = AuthSession::new();
        session.mark_authenticated();
        let mut authorized = lookup_query("secret");
        authorized.auth_token = Some(session.token());
        let matched = service.copy_matching(&authorized).expect("authorized");
        assert_eq!(matched.payload.as_deref(), Some(&b"abc"[..]));
        assert!(matched.attributes.expect("attributes").protected);
    }

    #[test]
    fn clear_empties_the_service() {
        let service = MemoryItemService::new();
        service.add(&insert_query("a", b"1")).expect("add");
        service.add(&insert_query("b", b"2")).expect("add");
        assert_eq!(service.len(), 2);
        service.clear();
        assert!(service.is_empty());
    }
}

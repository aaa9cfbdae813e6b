//! Item query construction: the attribute set describing one stored item.
//!
//! Queries are built by the store handle and consumed by the secure item
//! service. Presentation collaborators never construct queries directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthToken;

/// Accessibility classes for stored items, mirroring the platform tiers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Accessibility {
    /// Readable whenever the device is unlocked; migrates to new devices.
    WhenUnlocked,
    /// Readable whenever the device is unlocked; never leaves this device.
    WhenUnlockedThisDeviceOnly,
    /// Readable after the first unlock since boot; migrates to new devices.
    AfterFirstUnlock,
    /// Readable after the first unlock since boot; never leaves this device.
    AfterFirstUnlockThisDeviceOnly,
    /// Readable only while a device passcode is set; never leaves this device.
    WhenPasscodeSetThisDeviceOnly,
}

impl Accessibility {
    /// Whether this class pins the item to the current device.
    #[must_use]
    pub const fn is_device_bound(self) -> bool {
        matches!(
            self,
            Self::WhenUnlockedThisDeviceOnly
                | Self::AfterFirstUnlockThisDeviceOnly
                | Self::WhenPasscodeSetThisDeviceOnly
        )
    }
}

/// Protection tier requested for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionLevel {
    /// Service-level encryption only.
    Standard,
    /// Hardware-backed protection requiring user presence for access.
    HardwareBacked,
}

/// Whether a primitive may present authentication UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationUi {
    /// The service may prompt the user for authentication.
    Allow,
    /// The call must fail instead of presenting UI.
    Fail,
}

/// Match limit for lookup primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLimit {
    /// Resolve at most one item.
    One,
    /// Resolve every matching item.
    All,
}

/// Error produced when an access-control descriptor cannot be created.
#[derive(Debug, Clone, Error)]
#[error("access control requires a device-bound accessibility class, got {accessibility}")]
pub struct AccessControlError {
    accessibility: Accessibility,
}

/// Descriptor binding an item to a required authentication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    accessibility: Accessibility,
    user_presence: bool,
}

impl AccessControl {
    /// Creates a descriptor requiring device-owner presence for every access.
    ///
    /// # Errors
    ///
    /// Fails when `accessibility` would let the item migrate off-device;
    /// presence-gated items must stay device-bound.
    pub const fn user_presence(
        accessibility: Accessibility,
    ) -> Result<Self, AccessControlError> {
        if accessibility.is_device_bound() {
            Ok(Self {
                accessibility,
                user_presence: true,
            })
        } else {
            Err(AccessControlError { accessibility })
        }
    }

    /// Accessibility class the descriptor was created with.
    #[must_use]
    pub const fn accessibility(self) -> Accessibility {
        self.accessibility
    }

    /// Whether the descriptor requires user presence.
    #[must_use]
    pub const fn requires_user_presence(self) -> bool {
        self.user_presence
    }
}

/// The attribute set describing one stored item for a service primitive.
///
/// On lookups, the shipped services treat [`ItemQuery::accessibility`] as a
/// readability requirement, which an always-unlocked host satisfies for
/// every class; on inserts it selects the class recorded for the new item.
#[derive(Debug, Clone)]
pub struct ItemQuery {
    /// Logical store label owning the item.
    pub service: String,
    /// Caller-supplied key identifying the item within the service.
    pub account: String,
    /// Maximum number of items the primitive may resolve.
    pub match_limit: Option<MatchLimit>,
    /// Request the stored attributes in the result.
    pub return_attributes: bool,
    /// Request the payload bytes in the result.
    pub return_data: bool,
    /// Accessibility restriction applied to the lookup or insert.
    pub accessibility: Option<Accessibility>,
    /// Access-control descriptor for presence-gated items.
    pub access_control: Option<AccessControl>,
    /// Whether the primitive may present authentication UI.
    pub authentication_ui: AuthenticationUi,
    /// Live authentication context authorizing access to protected items.
    pub auth_token: Option<AuthToken>,
    /// Human-readable prompt shown when authentication UI is presented.
    pub operation_prompt: Option<String>,
    /// Payload bytes for insert primitives.
    pub payload: Option<Vec<u8>>,
}

impl ItemQuery {
    /// Creates an empty query identifying `account` within `service`.
    #[must_use]
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            match_limit: None,
            return_attributes: false,
            return_data: false,
            accessibility: None,
            access_control: None,
            authentication_ui: AuthenticationUi::Allow,
            auth_token: None,
            operation_prompt: None,
            payload: None,
        }
    }
}

/// Attributes of a stored item returned by a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAttributes {
    /// Logical store label the item belongs to.
    pub service: String,
    /// Key the item is stored under.
    pub account: String,
    /// Accessibility class recorded at insert time.
    pub accessibility: Accessibility,
    /// Whether the item is bound to an access-control policy.
    pub protected: bool,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::*;

    #[test_case(Accessibility::WhenUnlocked, false)]
    #[test_case(Accessibility::WhenUnlockedThisDeviceOnly, true)]
    #[test_case(Accessibility::AfterFirstUnlock, false)]
    #[test_case(Accessibility::AfterFirstUnlockThisDeviceOnly, true)]
    #[test_case(Accessibility::WhenPasscodeSetThisDeviceOnly, true)]
    fn device_binding_follows_the_class(accessibility: Accessibility, bound: bool) {
        assert_eq!(accessibility.is_device_bound(), bound);
    }

    #[test]
    fn accessibility_parses_from_kebab_case() {
        let parsed =
            Accessibility::from_str("when-passcode-set-this-device-only").expect("parse");
        assert_eq!(parsed, Accessibility::WhenPasscodeSetThisDeviceOnly);
        assert_eq!(
            Accessibility::WhenUnlocked.to_string(),
            "when-unlocked"
        );
    }

    #[test]
    fn access_control_requires_device_binding() {
        let control =
            AccessControl::user_presence(Accessibility::WhenPasscodeSetThisDeviceOnly)
                .expect("device-bound class");
        assert!(control.requires_user_presence());
        assert_eq!(
            control.accessibility(),
            Accessibility::WhenPasscodeSetThisDeviceOnly
        );

        let err = AccessControl::user_presence(Accessibility::WhenUnlocked)
            .expect_err("migrating class");
        assert!(err.to_string().contains("when-unlocked"));
    }

    #[test]
    fn new_query_carries_only_the_identity() {
        let query = ItemQuery::new("org.example.store", "token");
        assert_eq!(query.service, "org.example.store");
        assert_eq!(query.account, "token");
        assert!(query.match_limit.is_none());
        assert!(!query.return_attributes);
        assert!(!query.return_data);
        assert_eq!(query.authentication_ui, AuthenticationUi::Allow);
        assert!(query.auth_token.is_none());
        assert!(query.payload.is_none());
    }
}

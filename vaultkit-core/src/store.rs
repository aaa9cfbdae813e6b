//! The secure credential store handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{AuthError, AuthSession, AuthToken, BiometryKind, DeviceAuthenticator};
use crate::backend::SecureItemService;
use crate::envelope;
use crate::error::{StoreError, StoreResult};
use crate::query::{
    AccessControl, Accessibility, AuthenticationUi, ItemQuery, MatchLimit,
    ProtectionLevel,
};
use crate::status::{OsStatus, ServiceError};

/// Logical store label used when a configuration does not override it.
pub const DEFAULT_SERVICE_LABEL: &str = "org.vaultkit.store";

/// Reason shown for face-recognition prompts by default.
pub const DEFAULT_FACE_PROMPT_REASON: &str =
    "Authenticate with face recognition to unlock your saved credentials.";

/// Reason shown for fingerprint prompts by default.
pub const DEFAULT_FINGERPRINT_PROMPT_REASON: &str =
    "Authenticate with your fingerprint to unlock your saved credentials.";

/// Configuration for one store handle.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Logical store label scoping every key owned by this handle.
    pub service: String,
    /// Protection tier requested for items written by this handle.
    pub protection: ProtectionLevel,
    /// Accessibility class required of hardware-backed items.
    pub protected_accessibility: Accessibility,
    /// Human-readable prompt applied to mutating and read queries.
    pub prompt_description: Option<String>,
    /// Reason string shown for face-recognition prompts.
    pub face_prompt_reason: String,
    /// Reason string shown for fingerprint prompts.
    pub fingerprint_prompt_reason: String,
}

impl StoreConfig {
    /// Standard-protection configuration with the default service label.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            service: DEFAULT_SERVICE_LABEL.to_string(),
            protection: ProtectionLevel::Standard,
            protected_accessibility: Accessibility::WhenPasscodeSetThisDeviceOnly,
            prompt_description: None,
            face_prompt_reason: DEFAULT_FACE_PROMPT_REASON.to_string(),
            fingerprint_prompt_reason: DEFAULT_FINGERPRINT_PROMPT_REASON.to_string(),
        }
    }

    /// Hardware-backed configuration carrying an operation prompt.
    #[must_use]
    pub fn hardware_backed(prompt_description: impl Into<String>) -> Self {
        Self {
            protection: ProtectionLevel::HardwareBacked,
            prompt_description: Some(prompt_description.into()),
            ..Self::standard()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Tri-state classification of the shared existence probe.
enum ProbeOutcome {
    /// An item exists for the key, including found-but-interaction-not-
    /// allowed and duplicate-item statuses.
    Found,
    /// No item exists for the key.
    NotFound,
    /// The probe failed with an unrelated status.
    Error(ServiceError),
}

/// Typed secure credential store.
///
/// One handle per `(protection, prompt)` configuration; callers may hold any
/// number of handles, but every handle addresses the same service namespace
/// for a given key, so two handles writing the same key collide.
///
/// Every primitive call issued by a handle runs under its private
/// serialization lock, so operations on one handle are totally ordered at
/// the service layer even when invoked from multiple threads. No ordering
/// exists across handles: two handles racing an insert on the same new key
/// produce exactly one success and one [`StoreError::DuplicateItem`].
///
/// All operations block the caller; only [`SecureStore::prompt`] completes
/// asynchronously.
pub struct SecureStore {
    service: Arc<dyn SecureItemService>,
    authenticator: Arc<dyn DeviceAuthenticator>,
    config: StoreConfig,
    /// Serializes every service primitive issued by this handle.
    op_lock: Mutex<()>,
    /// The handle's single live authentication session.
    session: Mutex<Option<AuthSession>>,
}

impl SecureStore {
    /// Creates a handle over `service`, authenticated by `authenticator`.
    #[must_use]
    pub fn new(
        service: Arc<dyn SecureItemService>,
        authenticator: Arc<dyn DeviceAuthenticator>,
        config: StoreConfig,
    ) -> Self {
        Self {
            service,
            authenticator,
            config,
            op_lock: Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    /// The handle configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Stores `value` under `key`, replacing any existing item.
    ///
    /// The value is wrapped in a single-field envelope before serialization
    /// so arbitrary payload types share one decode path. When an item
    /// already exists for `key` (including one that currently needs
    /// authentication) the stored payload is replaced; otherwise a fresh
    /// item is inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] when the value cannot be
    /// encoded, [`StoreError::InteractionNotAllowed`] when a protected item
    /// needs a fresh prompt, [`StoreError::DuplicateItem`] when a concurrent
    /// insert from another handle won the race, or the raw service status
    /// otherwise.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let payload = envelope::encode(value)?;
        self.write_payload(key, payload)
    }

    /// Replaces the value stored under `key`, inserting it when absent.
    ///
    /// Behaves identically to [`SecureStore::set`]: the existence probe
    /// picks the insert or update primitive, with a single one-hop fallback
    /// and no further retries.
    ///
    /// # Errors
    ///
    /// Same contract as [`SecureStore::set`].
    pub fn update<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let payload = envelope::encode(value)?;
        self.write_payload(key, payload)
    }

    /// Loads the value stored under `key`.
    ///
    /// A missing key is [`StoreError::ItemNotFound`], never a silent `None`.
    /// `Ok(None)` occurs only when the stored envelope holds an explicit
    /// null value — callers must handle the two cases separately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ItemNotFound`] when no item exists,
    /// [`StoreError::Serialization`] when the stored bytes do not decode as
    /// the expected envelope type, [`StoreError::InteractionNotAllowed`]
    /// when the item needs a fresh prompt, or the raw service status
    /// otherwise.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.probe(key) {
            ProbeOutcome::Found => {
                let mut query = self.operation_query(key);
                query.return_data = true;
                let matched = self
                    .run_serialized(|service| service.copy_matching(&query))
                    .map_err(StoreError::from_service)?;
                match matched.payload {
                    Some(bytes) => envelope::decode::<Option<T>>(&bytes),
                    None => Ok(None),
                }
            }
            ProbeOutcome::NotFound => Err(StoreError::ItemNotFound),
            ProbeOutcome::Error(err) => Err(StoreError::from_service(err)),
        }
    }

    /// Deletes the item stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ItemNotFound`] when no item exists,
    /// [`StoreError::InteractionNotAllowed`] when the item needs a fresh
    /// prompt, or the raw service status otherwise.
    pub fn remove(&self, key: &str) -> StoreResult<()> {
        match self.probe(key) {
            ProbeOutcome::Found => {
                let query = self.operation_query(key);
                self.run_serialized(|service| service.delete(&query))
                    .map_err(StoreError::from_service)
            }
            ProbeOutcome::NotFound => Err(StoreError::ItemNotFound),
            ProbeOutcome::Error(err) => Err(StoreError::from_service(err)),
        }
    }

    /// Whether device-owner authentication with biometrics is available.
    ///
    /// Policy-evaluation failures are logged and resolve to `false`.
    #[must_use]
    pub fn is_biometrics_available(&self) -> bool {
        match self.authenticator.can_evaluate_biometrics() {
            Ok(available) => available,
            Err(err) => {
                tracing::error!(error = %err, "biometric availability check failed");
                false
            }
        }
    }

    /// Whether fingerprint biometry specifically is available.
    #[must_use]
    pub fn is_fingerprint_available(&self) -> bool {
        self.is_biometrics_available()
            && self.authenticator.biometry_kind() == BiometryKind::Fingerprint
    }

    /// Whether face biometry specifically is available.
    #[must_use]
    pub fn is_face_available(&self) -> bool {
        self.is_biometrics_available()
            && self.authenticator.biometry_kind() == BiometryKind::Face
    }

    /// Prompts for device-owner authentication.
    ///
    /// When biometrics are unavailable the completion is **never** invoked —
    /// callers must not block on it unconditionally. Otherwise the live
    /// session is invalidated and a fresh one opened before any UI can
    /// appear, the reason string is chosen by detected biometry kind, and
    /// the policy is evaluated on a background thread; the completion
    /// receives the outcome there. This layer provides no cancellation and
    /// no timeout beyond what the authenticator itself enforces.
    pub fn prompt<F>(&self, completion: F)
    where
        F: FnOnce(bool, Option<AuthError>) + Send + 'static,
    {
        if !self.is_biometrics_available() {
            return;
        }

        let token = self.refresh_session();
        let reason = if self.is_face_available() {
            self.config.face_prompt_reason.clone()
        } else {
            self.config.fingerprint_prompt_reason.clone()
        };

        let authenticator = Arc::clone(&self.authenticator);
        thread::spawn(move || match authenticator.evaluate_device_owner(&reason) {
            Ok(success) => {
                if success {
                    token.mark_authenticated();
                }
                completion(success, None);
            }
            Err(err) => {
                tracing::error!(error = %err, "device-owner authentication failed");
                completion(false, Some(err));
            }
        });
    }

    // Internal plumbing

    /// Existence probe shared by every operation.
    ///
    /// Runs with authentication UI disallowed so probing a protected item
    /// can never present a prompt; the resulting interaction-not-allowed
    /// status is classified as "found".
    fn probe(&self, key: &str) -> ProbeOutcome {
        let query = self.probe_query(key);
        match self.run_serialized(|service| service.copy_matching(&query)) {
            Ok(_) => ProbeOutcome::Found,
            Err(err) => match err.status {
                OsStatus::ITEM_NOT_FOUND => ProbeOutcome::NotFound,
                OsStatus::DUPLICATE_ITEM | OsStatus::INTERACTION_NOT_ALLOWED => {
                    ProbeOutcome::Found
                }
                _ => ProbeOutcome::Error(err),
            },
        }
    }

    /// Dispatches an encoded payload to the insert or update primitive.
    fn write_payload(&self, key: &str, payload: Vec<u8>) -> StoreResult<()> {
        match self.probe(key) {
            ProbeOutcome::Found => {
                let query = self.operation_query(key);
                self.run_serialized(|service| service.update(&query, &payload))
                    .map_err(StoreError::from_service)
            }
            ProbeOutcome::NotFound => {
                let mut query = self.operation_query(key);
                query.payload = Some(payload);
                self.run_serialized(|service| service.add(&query))
                    .map_err(StoreError::from_service)
            }
            ProbeOutcome::Error(err) => Err(StoreError::from_service(err)),
        }
    }

    fn probe_query(&self, key: &str) -> ItemQuery {
        let mut query = ItemQuery::new(self.config.service.clone(), key);
        query.match_limit = Some(MatchLimit::One);
        query.return_attributes = true;
        query.accessibility = Some(Accessibility::WhenUnlockedThisDeviceOnly);
        query.authentication_ui = AuthenticationUi::Fail;
        query
    }

    /// Builds the query shared by the insert, update, read and delete
    /// primitives: hardware-protection attributes and the operation prompt
    /// are applied, then the probe-only attributes are stripped.
    fn operation_query(&self, key: &str) -> ItemQuery {
        let mut query = self.probe_query(key);
        if self.config.protection == ProtectionLevel::HardwareBacked {
            match AccessControl::user_presence(self.config.protected_accessibility) {
                Ok(control) => query.access_control = Some(control),
                Err(err) => {
                    tracing::error!(error = %err, "skipping access control attribute");
                }
            }
            query.authentication_ui = AuthenticationUi::Allow;
            query.auth_token = Some(self.session_token());
        }
        query.operation_prompt = self.config.prompt_description.clone();
        query.accessibility = None;
        query.match_limit = None;
        query.return_attributes = false;
        query
    }

    /// Runs one service primitive under the handle's serialization lock.
    fn run_serialized<R>(
        &self,
        primitive: impl FnOnce(&dyn SecureItemService) -> Result<R, ServiceError>,
    ) -> Result<R, ServiceError> {
        let _serialized = self.op_guard();
        primitive(self.service.as_ref())
    }

    fn op_guard(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token for the live session, opening one lazily when needed.
    fn session_token(&self) -> AuthToken {
        let mut slot = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert_with(AuthSession::new).token()
    }

    /// Invalidates any live session and opens a fresh one.
    fn refresh_session(&self) -> AuthToken {
        let mut slot = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = slot.as_mut() {
            session.invalidate();
        }
        let session = AuthSession::new();
        let token = session.token();
        *slot = Some(session);
        token
    }
}

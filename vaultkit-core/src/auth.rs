//! Device-owner authentication: policy evaluation and session lifecycle.
//!
//! The store never talks to biometric hardware itself. It evaluates the
//! device-owner authentication policy through the [`DeviceAuthenticator`]
//! trait and tracks the outcome in an [`AuthSession`] owned by the store
//! handle. The session's [`AuthToken`] is what item queries carry as their
//! authentication context reference: backends honor the token only while the
//! session is authenticated and has not been invalidated.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Kinds of biometry a device may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometryKind {
    /// No biometric hardware is present.
    None,
    /// Fingerprint reader.
    Fingerprint,
    /// Face recognition.
    Face,
}

/// Errors raised while evaluating the device-owner authentication policy.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The policy cannot be evaluated on this device.
    #[error("device-owner authentication unavailable: {0}")]
    Unavailable(String),
    /// The user or the system aborted an in-flight evaluation.
    #[error("device-owner authentication canceled")]
    Canceled,
    /// The evaluation ran and the user failed to authenticate.
    #[error("device-owner authentication failed: {0}")]
    Failed(String),
}

/// Platform evaluator for device-owner authentication.
///
/// External boundary: real devices back this with their biometric or
/// passcode service; headless hosts use [`UnavailableAuthenticator`].
pub trait DeviceAuthenticator: Send + Sync {
    /// Biometry kind present on this device.
    fn biometry_kind(&self) -> BiometryKind;

    /// Evaluates whether device-owner authentication with biometrics can run.
    ///
    /// # Errors
    ///
    /// Returns an error when the policy itself cannot be evaluated (no
    /// hardware, nothing enrolled, device policy). The store logs the error
    /// and downgrades availability to `false`.
    fn can_evaluate_biometrics(&self) -> Result<bool, AuthError>;

    /// Runs one device-owner authentication evaluation, blocking until the
    /// user responds. Returns `Ok(true)` when the user authenticated.
    ///
    /// # Errors
    ///
    /// Returns an error when the evaluation could not run or was aborted.
    fn evaluate_device_owner(&self, reason: &str) -> Result<bool, AuthError>;
}

// AuthSession / AuthToken

#[derive(Debug)]
struct SessionState {
    authenticated: AtomicBool,
    invalidated: AtomicBool,
}

/// Opaque reference to a live authentication session.
///
/// Cloning shares the underlying session state. A token authorizes access to
/// protected items only while its session is authenticated and has not been
/// invalidated.
#[derive(Debug, Clone)]
pub struct AuthToken(Arc<SessionState>);

impl AuthToken {
    /// Whether the token currently authorizes access to protected items.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0.authenticated.load(Ordering::Acquire)
            && !self.0.invalidated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_authenticated(&self) {
        self.0.authenticated.store(true, Ordering::Release);
    }
}

/// Credential reuse window granted to a fresh session.
const DEFAULT_REUSE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// One device-owner authentication session.
///
/// Exactly one live session exists per store handle. Invalidating a session
/// closes it and forces the credential reuse window to zero, so a stale
/// session can never stand in for a fresh prompt.
#[derive(Debug)]
pub struct AuthSession {
    state: Arc<SessionState>,
    reuse_window: Duration,
}

impl AuthSession {
    /// Opens a fresh, not-yet-authenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(SessionState {
                authenticated: AtomicBool::new(false),
                invalidated: AtomicBool::new(false),
            }),
            reuse_window: DEFAULT_REUSE_WINDOW,
        }
    }

    /// Token referencing this session from item queries.
    #[must_use]
    pub fn token(&self) -> AuthToken {
        AuthToken(Arc::clone(&self.state))
    }

    /// Records that this session passed device-owner authentication.
    pub fn mark_authenticated(&self) {
        self.token().mark_authenticated();
    }

    /// Closes the session and zeroes the credential reuse window.
    pub fn invalidate(&mut self) {
        self.state.invalidated.store(true, Ordering::Release);
        self.reuse_window = Duration::ZERO;
    }

    /// Remaining credential reuse window.
    #[must_use]
    pub const fn reuse_window(&self) -> Duration {
        self.reuse_window
    }

    /// Whether this session still authorizes protected access.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token().is_valid()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

// Shipped authenticators

/// Authenticator for hosts with no device-owner authentication service.
///
/// Availability always resolves to `false`, so prompting never runs and
/// protected items stay unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableAuthenticator;

impl DeviceAuthenticator for UnavailableAuthenticator {
    fn biometry_kind(&self) -> BiometryKind {
        BiometryKind::None
    }

    fn can_evaluate_biometrics(&self) -> Result<bool, AuthError> {
        Ok(false)
    }

    fn evaluate_device_owner(&self, _reason: &str) -> Result<bool, AuthError> {
        Err(AuthError::Unavailable(
            "no device-owner authentication service on this host".to_string(),
        ))
    }
}

/// Scriptable authenticator.
///
/// **FOR TESTING ONLY** — evaluation outcomes are fixed up front and every
/// evaluation is counted, so tests can assert that existence probes never
/// reach the authenticator.
#[derive(Debug)]
pub struct StaticAuthenticator {
    kind: BiometryKind,
    available: bool,
    availability_error: Option<String>,
    outcome: bool,
    evaluations: AtomicUsize,
}

impl StaticAuthenticator {
    /// Authenticator whose evaluations succeed with the given biometry kind.
    #[must_use]
    pub const fn succeeding(kind: BiometryKind) -> Self {
        Self {
            kind,
            available: true,
            availability_error: None,
            outcome: true,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Authenticator whose evaluations run but report a failed match.
    #[must_use]
    pub const fn failing(kind: BiometryKind) -> Self {
        Self {
            kind,
            available: true,
            availability_error: None,
            outcome: false,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Authenticator whose availability check itself errors.
    #[must_use]
    pub fn erroring(message: &str) -> Self {
        Self {
            kind: BiometryKind::None,
            available: false,
            availability_error: Some(message.to_string()),
            outcome: false,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Number of policy evaluations run so far.
    #[must_use]
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl DeviceAuthenticator for StaticAuthenticator {
    fn biometry_kind(&self) -> BiometryKind {
        self.kind
    }

    fn can_evaluate_biometrics(&self) -> Result<bool, AuthError> {
        self.availability_error.as_ref().map_or(
            Ok(self.available),
            |message| Err(AuthError::Unavailable(message.clone())),
        )
    }

    fn evaluate_device_owner(&self, _reason: &str) -> Result<bool, AuthError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome)
    }
}

//! Secure credential storage for mobile browser apps.
//!
//! This crate provides a typed keychain-style store with optional biometric
//! gating and hardware-backed protection. It is the storage engine behind
//! passcode screens, saved-login UI and similar presentation surfaces, which
//! call only the store operations and never construct item queries
//! themselves.
//!
//! # Architecture
//!
//! - [`SecureStore`] — the handle: typed `set`/`update`/`get`/`remove`,
//!   biometric availability queries and `prompt`
//! - [`query`] — the attribute set describing one stored item
//! - [`auth`] — device-owner authentication sessions and the
//!   [`auth::DeviceAuthenticator`] platform seam
//! - [`backend`] — the [`backend::SecureItemService`] boundary with an
//!   in-memory test service and a software-encrypted file fallback
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use vaultkit_core::auth::UnavailableAuthenticator;
//! use vaultkit_core::backend::MemoryItemService;
//! use vaultkit_core::{SecureStore, StoreConfig};
//!
//! let store = SecureStore::new(
//!     Arc::new(MemoryItemService::new()),
//!     Arc::new(UnavailableAuthenticator),
//!     StoreConfig::standard(),
//! );
//!
//! store.set("token", &"abc".to_string())?;
//! let token: Option<String> = store.get("token")?;
//! assert_eq!(token.as_deref(), Some("abc"));
//!
//! store.remove("token")?;
//! # Ok::<(), vaultkit_core::StoreError>(())
//! ```

pub mod auth;
pub mod backend;
mod envelope;
mod error;
pub mod query;
pub mod status;
mod store;

pub use error::{StoreError, StoreResult, ERROR_DOMAIN};
pub use store::{
    SecureStore, StoreConfig, DEFAULT_FACE_PROMPT_REASON,
    DEFAULT_FINGERPRINT_PROMPT_REASON, DEFAULT_SERVICE_LABEL,
};

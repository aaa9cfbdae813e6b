//! Single-field payload envelope shared by all typed values.
//!
//! Values are wrapped before serialization so heterogeneous payload types
//! share one decode path: the stored bytes are always a CBOR map with a
//! single `value` field, whatever the caller's type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    value: T,
}

/// Encodes `value` into the opaque payload handed to the service.
pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&Envelope { value }, &mut bytes)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;
    Ok(bytes)
}

/// Decodes a stored payload back into its wrapped value.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    let envelope: Envelope<T> = ciborium::de::from_reader(bytes)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;
    Ok(envelope.value)
}

use thiserror::Error;

use crate::value::ValueType;

/// Top-level error type for the `plexkit-fimp` crate.
///
/// Covers message decoding, addressing, and bus transport failures.
/// `plexkit-core` maps these into runtime-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Payload ─────────────────────────────────────────────────────
    /// The payload carries a different value type than the caller expected.
    #[error("unexpected value type: expected {expected}, got {got}")]
    UnexpectedValueType { expected: ValueType, got: ValueType },

    /// The `val_t` field names a type this crate does not know.
    #[error("unknown value type: {0}")]
    UnknownValueType(String),

    /// The `val` field does not fit the declared `val_t`.
    #[error("invalid value for type {value_type}: {reason}")]
    InvalidValue { value_type: ValueType, reason: String },

    /// A required property is missing from the payload.
    #[error("missing property: {0}")]
    MissingProperty(String),

    /// JSON (de)serialization of a message body failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Addressing ──────────────────────────────────────────────────
    /// The topic could not be parsed into an address.
    #[error("invalid address '{topic}': {reason}")]
    InvalidAddress { topic: String, reason: String },

    // ── Transport ───────────────────────────────────────────────────
    /// The transport has not been started or has been stopped.
    #[error("transport is not connected")]
    NotConnected,

    /// The transport failed to publish or subscribe.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Returns `true` if the error describes a malformed payload rather
    /// than a transport failure.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedValueType { .. }
                | Self::UnknownValueType(_)
                | Self::InvalidValue { .. }
                | Self::MissingProperty(_)
                | Self::Json(_)
        )
    }
}

// ── Core error types ──
//
// Errors surfaced by the adapter runtime. Handler errors never leave the
// router: they become `evt.error.report` messages. State errors
// (start twice, stop before start) always reach the caller.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    // ── Payload errors ───────────────────────────────────────────────
    #[error("invalid payload: {0}")]
    InvalidPayload(plexkit_fimp::Error),

    #[error("invalid payload: {message}")]
    InvalidRequest { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("handler failed: {message}")]
    Handler { message: String },

    // ── State errors ─────────────────────────────────────────────────
    #[error("{component} is not started")]
    NotStarted { component: &'static str },

    #[error("{component} is already started")]
    AlreadyStarted { component: &'static str },

    // ── I/O errors (wrapped) ─────────────────────────────────────────
    #[error("bus transport error: {0}")]
    Transport(plexkit_fimp::Error),

    #[error("storage error: {0}")]
    Storage(#[from] plexkit_storage::Error),

    #[error("thing {id}: {source}")]
    Thing {
        id: String,
        #[source]
        source: Box<CoreError>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn handler(message: impl std::fmt::Display) -> Self {
        Self::Handler {
            message: message.to_string(),
        }
    }

    /// Prefix an error with the ID of the thing it concerns.
    pub fn for_thing(self, id: impl Into<String>) -> Self {
        Self::Thing {
            id: id.into(),
            source: Box::new(self),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Thing { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<plexkit_fimp::Error> for CoreError {
    fn from(err: plexkit_fimp::Error) -> Self {
        if err.is_payload_error() {
            Self::InvalidPayload(err)
        } else {
            Self::Transport(err)
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(plexkit_fimp::Error::Json(err))
    }
}

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // ── File system ─────────────────────────────────────────────────
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Encoding ────────────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    // ── Configuration store ─────────────────────────────────────────
    #[error("no data file at {data} and no defaults configured")]
    NoData { data: PathBuf },

    // ── Key-value store ─────────────────────────────────────────────
    #[error("store is not started")]
    NotStarted,

    #[error("store is already started")]
    AlreadyStarted,

    #[error("corrupted data in {path} at byte {offset}: {reason}")]
    Corrupted {
        path: PathBuf,
        offset: usize,
        reason: String,
    },

    #[error("recovery of {path} failed: {reason}")]
    RecoveryFailed { path: PathBuf, reason: String },
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Self::NoData { .. } => true,
            _ => false,
        }
    }
}

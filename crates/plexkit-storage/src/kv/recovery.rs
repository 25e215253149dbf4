// ── Log recovery ──
//
// A log that stops parsing partway is salvaged: every command before the
// bad record is replayed, the live keyspace is written to
// `<path>.recovered`, the damaged file is kept aside as `<path>.corrupted`
// and the recovered file takes the primary name.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::engine::{now_ms, write_synced, Keyspace};
use crate::config::with_suffix;
use crate::error::Error;

pub(crate) const RECOVERED_SUFFIX: &str = ".recovered";
pub(crate) const CORRUPTED_SUFFIX: &str = ".corrupted";

/// Outcome of a successful recovery.
#[derive(Debug)]
pub(crate) struct Recovered {
    pub keys: usize,
    pub corrupted: PathBuf,
}

pub(crate) fn recover(path: &Path) -> Result<Recovered, Error> {
    let failed = |reason: String| Error::RecoveryFailed {
        path: path.to_path_buf(),
        reason,
    };

    let body = fs::read(path).map_err(|e| failed(format!("read: {e}")))?;
    let (keyspace, err) = Keyspace::replay(&body);
    if let Some(e) = &err {
        warn!(
            path = %path.display(),
            offset = e.offset,
            reason = %e.reason,
            keys = keyspace.items.len(),
            "salvaging log up to first bad record"
        );
    }

    let recovered = with_suffix(path, RECOVERED_SUFFIX);
    let corrupted = with_suffix(path, CORRUPTED_SUFFIX);

    write_synced(&recovered, &keyspace.snapshot(now_ms()))
        .map_err(|e| failed(format!("write {}: {e}", recovered.display())))?;

    match fs::remove_file(&corrupted) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(failed(format!("remove {}: {e}", corrupted.display()))),
    }
    fs::rename(path, &corrupted)
        .map_err(|e| failed(format!("rename to {}: {e}", corrupted.display())))?;
    fs::rename(&recovered, path)
        .map_err(|e| failed(format!("rename {}: {e}", recovered.display())))?;

    Ok(Recovered {
        keys: keyspace.items.len(),
        corrupted,
    })
}

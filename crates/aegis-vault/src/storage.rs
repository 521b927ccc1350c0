//! Atomic file persistence for vault records.
//!
//! Every write goes to a temporary file in the destination directory, is
//! flushed to disk, and is then renamed over the target.  A reader therefore
//! sees either the old record or the new one, never a torn write.  Temporary
//! files are created owner-only (mode 0600 on Unix).

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::{Result, VaultError};

/// Whether an existing target may be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace any existing file.
    Replace,
    /// Fail with [`std::io::ErrorKind::AlreadyExists`] if the target exists.
    CreateNew,
}

/// Atomically write `bytes` to `path`.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: WriteMode) -> Result<()> {
    let dir = parent_dir(path)?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    match mode {
        WriteMode::Replace => tmp.persist(path).map_err(|e| VaultError::Io(e.error))?,
        WriteMode::CreateNew => tmp
            .persist_noclobber(path)
            .map_err(|e| VaultError::Io(e.error))?,
    };

    tracing::trace!(file = %file_name(path), len = bytes.len(), "persisted record");
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T, mode: WriteMode) -> Result<()> {
    let bytes = zeroize::Zeroizing::new(serde_json::to_vec_pretty(value)?);
    write_atomic(path, &bytes, mode)
}

/// Read and deserialize a JSON record, or `None` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => zeroize::Zeroizing::new(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Remove `path`, treating a missing file as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Final path component, for log lines that must not carry absolute paths.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parent_dir(path: &Path) -> Result<&Path> {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        Some(_) => Ok(Path::new(".")),
        None => Err(VaultError::storage("record path has no parent directory")),
    }
}

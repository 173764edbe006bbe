//! Whole-file atomic persistence for the small JSON state files.
//!
//! Every write goes to a sibling temp file which is then renamed over the
//! target, so a concurrent reader sees either the previous or the next
//! complete content. There are no locks: two racing writers resolve as
//! last-rename-wins.

use crate::error::{FatalError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

/// Read a text file, returning `None` if it doesn't exist.
pub fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FatalError::io("reading", path, e)),
    }
}

/// Load a JSON state file. An absent (or blank) file yields `T::default()`;
/// a file that exists but does not parse is fatal.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match read_text(path)? {
        Some(s) if !s.trim().is_empty() => {
            serde_json::from_str(&s).map_err(|source| FatalError::CorruptState {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => Ok(T::default()),
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| FatalError::Internal(anyhow::Error::new(e).context("serializing state")))?;
    write_atomic(path, json.as_bytes())
}

/// Atomically replace `path` with `contents`, creating parent directories.
///
/// The temp file lives in the destination directory so the final rename
/// never crosses filesystems. On any failure the temp file is dropped,
/// which deletes it.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| FatalError::io("creating", dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".focus-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| FatalError::io("creating temp file in", dir, e))?;
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| FatalError::io("writing temp file for", path, e))?;

    let mut attempt = 1;
    loop {
        match tmp.persist(path) {
            Ok(_) => return Ok(()),
            Err(err) if attempt < PERSIST_ATTEMPTS => {
                tracing::debug!(path = %path.display(), attempt, error = %err.error, "rename failed, retrying");
                tmp = err.file;
                attempt += 1;
                thread::sleep(PERSIST_BACKOFF);
            }
            Err(err) => {
                return Err(FatalError::Persist {
                    path: path.to_path_buf(),
                    source: err.error,
                });
            }
        }
    }
}

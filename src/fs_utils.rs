//! Filesystem helpers for durable, atomically replaced documents
//!
//! - `atomic_rename`: replaces a target in one step (Windows requires explicit delete)
//! - `write_json_atomic`: write-then-rename persistence for small JSON documents
//! - `read_json`: load a document, `None` when it does not exist
//! - `default_data_dir`: platform-appropriate data directory

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GoldenRepoError, Result};

/// Cross-platform atomic rename that handles Windows file replacement.
///
/// On Unix, `fs::rename` atomically replaces the target if it exists.
/// On Windows, `fs::rename` fails if the target exists, so the target is
/// deleted first (readers may briefly see it missing there).
pub fn atomic_rename(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if dst.is_file() {
            fs::remove_file(dst)?;
        }
    }
    fs::rename(src, dst)
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The temp file lives in the same directory as the target so the final
/// rename never crosses filesystems. A reader either sees the old document
/// or the new one, never a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| GoldenRepoError::io(parent, e))?;

    let content = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&content)?;
        file.write_all(b"\n")?;
        file.sync_all()
    })();

    if let Err(e) = written.and_then(|_| atomic_rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(GoldenRepoError::io(path, e));
    }

    Ok(())
}

/// Read a JSON document, returning `None` if the file does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GoldenRepoError::io(path, e)),
    }
}

/// Remove a file, treating "already gone" as success
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(GoldenRepoError::io(path, e)),
    }
}

/// Remove a directory tree, treating "already gone" as success
pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(GoldenRepoError::io(path, e)),
    }
}

/// Whether `path` is a directory with at least one entry
pub fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Get platform-appropriate data directory.
///
/// - `$XDG_DATA_HOME/golden-repos` or `~/.local/share/golden-repos` on Unix
/// - `%LOCALAPPDATA%\golden-repos` on Windows
/// - temp directory + `golden-repos` as a last resort
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("golden-repos")
}

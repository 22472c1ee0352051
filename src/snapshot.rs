//! Versioned snapshots of indexed golden repos
//!
//! A snapshot is an immutable copy-on-write clone of a repo's master after
//! its indexes were built. Layout:
//!
//! ```text
//! <versioned_root>/
//!   <repo_name>/
//!     v_1734000000000/     <- published snapshots, token = unix millis
//!     v_1734000360000/
//!     .v_1734000720000.partial   <- clone in progress, never published
//! ```
//!
//! Clones are written into a hidden partial directory and renamed into
//! place only once complete, so a `v_<token>` directory is always whole.
//! Tokens strictly increase per process and never go below what is already
//! on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::{GoldenRepoError, Result};
use crate::fs_utils;

const SNAPSHOT_PREFIX: &str = "v_";

// ============================================================================
// Clone backends
// ============================================================================

/// Copy-on-write clone primitive. `dest` must not exist beforehand.
pub trait CloneBackend: Send + Sync {
    fn clone_tree(&self, source: &Path, dest: &Path) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Shells out to `cp` with reflinks where the filesystem supports them
/// (btrfs, XFS, APFS), falling back to a regular copy otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflinkCloner;

impl CloneBackend for ReflinkCloner {
    fn clone_tree(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("cp");
        #[cfg(target_os = "macos")]
        cmd.args(["-c", "-R", "-p"]);
        #[cfg(not(target_os = "macos"))]
        cmd.args(["-a", "--reflink=auto"]);
        cmd.arg(source).arg(dest);

        let output = cmd.output().map_err(|e| GoldenRepoError::SnapshotFailure {
            repo_name: source.display().to_string(),
            message: format!("Failed to execute cp: {}", e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GoldenRepoError::SnapshotFailure {
                repo_name: source.display().to_string(),
                message: format!("cp failed: {}", stderr.trim()),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "reflink"
    }
}

/// Portable recursive copy. Symlinks are recreated, not followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyCloner;

impl CloneBackend for CopyCloner {
    fn clone_tree(&self, source: &Path, dest: &Path) -> Result<()> {
        if !source.is_dir() {
            return Err(GoldenRepoError::SnapshotFailure {
                repo_name: source.display().to_string(),
                message: "source is not a directory".to_string(),
            });
        }
        if dest.exists() {
            return Err(GoldenRepoError::SnapshotFailure {
                repo_name: source.display().to_string(),
                message: format!("destination {} already exists", dest.display()),
            });
        }
        copy_dir(source, dest)
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| GoldenRepoError::io(dest, e))?;

    for entry in fs::read_dir(source).map_err(|e| GoldenRepoError::io(source, e))? {
        let entry = entry.map_err(|e| GoldenRepoError::io(source, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| GoldenRepoError::io(&from, e))?;

        if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else if file_type.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| GoldenRepoError::io(&from, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    let link = fs::read_link(from).map_err(|e| GoldenRepoError::io(from, e))?;
    std::os::unix::fs::symlink(&link, to).map_err(|e| GoldenRepoError::io(to, e))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    if from.is_dir() {
        copy_dir(from, to)
    } else {
        fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| GoldenRepoError::io(from, e))
    }
}

// ============================================================================
// Snapshotter
// ============================================================================

/// A published, immutable snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSnapshot {
    pub repo_name: String,
    pub token: u64,
    pub path: PathBuf,
}

impl VersionedSnapshot {
    /// Creation time encoded in the token
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.token as i64).single()
    }
}

/// Creates and enumerates versioned snapshots
pub struct Snapshotter {
    root: PathBuf,
    cloner: Box<dyn CloneBackend>,
    last_token: Mutex<u64>,
}

impl Snapshotter {
    pub fn new(root: impl Into<PathBuf>, cloner: Box<dyn CloneBackend>) -> Self {
        Self {
            root: root.into(),
            cloner,
            last_token: Mutex::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cloner(&self) -> &dyn CloneBackend {
        self.cloner.as_ref()
    }

    fn repo_dir(&self, repo_name: &str) -> PathBuf {
        self.root.join(repo_name)
    }

    /// Whether `path` is a snapshot directory managed by this snapshotter
    pub fn is_snapshot_path(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| {
                let parts: Vec<_> = rel.components().collect();
                parts.len() == 2
                    && parts[1]
                        .as_os_str()
                        .to_str()
                        .and_then(parse_token)
                        .is_some()
            })
            .unwrap_or(false)
    }

    fn next_token(&self, floor: u64) -> u64 {
        let mut last = self.last_token.lock();
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let token = now.max(*last + 1).max(floor + 1);
        *last = token;
        token
    }

    /// Clone `source` into a new snapshot for `repo_name`.
    ///
    /// On failure nothing is left under the repo's snapshot directory.
    pub fn create_snapshot(&self, repo_name: &str, source: &Path) -> Result<VersionedSnapshot> {
        let repo_dir = self.repo_dir(repo_name);
        fs::create_dir_all(&repo_dir).map_err(|e| GoldenRepoError::io(&repo_dir, e))?;

        let floor = self
            .latest_snapshot(repo_name)?
            .map(|s| s.token)
            .unwrap_or(0);
        let token = self.next_token(floor);
        let final_path = repo_dir.join(format!("{}{}", SNAPSHOT_PREFIX, token));
        let partial_path = repo_dir.join(format!(".{}{}.partial", SNAPSHOT_PREFIX, token));

        tracing::info!(
            "Snapshotting {} from {} ({} clone)",
            repo_name,
            source.display(),
            self.cloner.name()
        );

        if let Err(e) = self.cloner.clone_tree(source, &partial_path) {
            let _ = fs_utils::remove_dir_if_exists(&partial_path);
            return Err(GoldenRepoError::SnapshotFailure {
                repo_name: repo_name.to_string(),
                message: e.to_string(),
            });
        }

        if let Err(e) = fs::rename(&partial_path, &final_path) {
            let _ = fs_utils::remove_dir_if_exists(&partial_path);
            return Err(GoldenRepoError::SnapshotFailure {
                repo_name: repo_name.to_string(),
                message: format!("Failed to publish snapshot: {}", e),
            });
        }

        Ok(VersionedSnapshot {
            repo_name: repo_name.to_string(),
            token,
            path: final_path,
        })
    }

    /// Published snapshots for a repo, oldest first
    pub fn list_snapshots(&self, repo_name: &str) -> Result<Vec<VersionedSnapshot>> {
        let repo_dir = self.repo_dir(repo_name);
        let entries = match fs::read_dir(&repo_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GoldenRepoError::io(&repo_dir, e)),
        };

        let mut snapshots: Vec<VersionedSnapshot> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name();
                let token = parse_token(name.to_str()?)?;
                Some(VersionedSnapshot {
                    repo_name: repo_name.to_string(),
                    token,
                    path: e.path(),
                })
            })
            .collect();
        snapshots.sort_by_key(|s| s.token);
        Ok(snapshots)
    }

    /// Newest published snapshot for a repo
    pub fn latest_snapshot(&self, repo_name: &str) -> Result<Option<VersionedSnapshot>> {
        Ok(self.list_snapshots(repo_name)?.pop())
    }

    /// Clone a snapshot back into `dest` (which must not exist).
    ///
    /// Goes through a sibling partial directory so `dest` only appears once complete.
    pub fn restore(&self, snapshot: &VersionedSnapshot, dest: &Path) -> Result<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| GoldenRepoError::io(parent, e))?;

        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "master".to_string());
        let partial = parent.join(format!(".{}.restore-{}", name, snapshot.token));
        fs_utils::remove_dir_if_exists(&partial)?;

        if let Err(e) = self.cloner.clone_tree(&snapshot.path, &partial) {
            let _ = fs_utils::remove_dir_if_exists(&partial);
            return Err(e);
        }
        if let Err(e) = fs::rename(&partial, dest) {
            let _ = fs_utils::remove_dir_if_exists(&partial);
            return Err(GoldenRepoError::io(dest, e));
        }
        Ok(())
    }
}

fn parse_token(name: &str) -> Option<u64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?.parse().ok()
}

//! Upstream change detection for remote golden repos
//!
//! Uses subprocess calls to git for maximum compatibility. The refresh job
//! only needs two things from upstream: the revision the origin currently
//! has, and a way to move the master clone onto it.

use std::path::Path;
use std::process::Command;

use crate::error::{GoldenRepoError, Result};

/// Run a git command and return stdout as string
pub fn git_command(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().map_err(|e| GoldenRepoError::Upstream {
        message: format!("Failed to execute git: {}", e),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GoldenRepoError::Upstream {
            message: format!("git {} failed: {}", args.join(" "), stderr.trim()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a git command, returning None if it fails (for optional queries)
pub fn git_command_optional(args: &[&str], cwd: Option<&Path>) -> Option<String> {
    git_command(args, cwd).ok()
}

/// Source of upstream revisions for a master clone. Blocking.
pub trait UpstreamTracker: Send + Sync {
    /// Revision the origin currently points at (fetches as needed)
    fn remote_revision(&self, master: &Path) -> Result<String>;

    /// Move the master working copy onto `revision`
    fn sync_to(&self, master: &Path, revision: &str) -> Result<()>;
}

/// Tracks the origin's default branch with plain git commands
#[derive(Debug, Clone, Default)]
pub struct GitUpstreamTracker {
    /// Branch to follow; `None` follows whatever `origin/HEAD` fetches
    pub branch: Option<String>,
}

impl GitUpstreamTracker {
    pub fn new(branch: Option<String>) -> Self {
        Self { branch }
    }
}

impl UpstreamTracker for GitUpstreamTracker {
    fn remote_revision(&self, master: &Path) -> Result<String> {
        let cwd = Some(master);
        match &self.branch {
            Some(branch) => git_command(&["fetch", "--quiet", "origin", branch], cwd)?,
            None => git_command(&["fetch", "--quiet", "origin"], cwd)?,
        };
        git_command(&["rev-parse", "FETCH_HEAD"], cwd)
    }

    fn sync_to(&self, master: &Path, revision: &str) -> Result<()> {
        let cwd = Some(master);
        git_command(&["reset", "--hard", "--quiet", revision], cwd)?;
        // Untracked leftovers would leak into the snapshot
        git_command(&["clean", "-fdq"], cwd)?;
        Ok(())
    }
}

/// HEAD revision of a working copy, if it is one
pub fn head_revision(path: &Path) -> Option<String> {
    git_command_optional(&["rev-parse", "HEAD"], Some(path))
}

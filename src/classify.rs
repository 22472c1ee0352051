//! Origin classification: which golden repos are refreshed from a remote
//!
//! | Origin                              | Kind      |
//! |-------------------------------------|-----------|
//! | `https://`, `http://`               | RemoteGit |
//! | `ssh://`, `git://`                  | RemoteGit |
//! | `user@host:org/repo.git`            | RemoteGit |
//! | empty / missing                     | Local     |
//! | `local://name`, `file://...`        | Local     |
//! | `/srv/repos/x`, `./x`, `C:\repos\x` | Local     |

use serde::{Deserialize, Serialize};

/// Marker scheme for repositories owned by this server
pub const LOCAL_SCHEME: &str = "local://";

const REMOTE_SCHEMES: &[&str] = &["https://", "http://", "ssh://", "git://"];

/// Where a golden repo's content comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoKind {
    /// Owned locally; never scheduled, refreshed only on explicit request
    Local,
    /// Mirrored from a remote git origin
    RemoteGit,
}

impl RepoKind {
    pub fn is_remote(self) -> bool {
        self == RepoKind::RemoteGit
    }
}

impl std::fmt::Display for RepoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoKind::Local => write!(f, "local"),
            RepoKind::RemoteGit => write!(f, "remote-git"),
        }
    }
}

/// Classify an origin string. Pure, no I/O.
pub fn classify_origin(origin: Option<&str>) -> RepoKind {
    let origin = match origin.map(str::trim) {
        Some(o) if !o.is_empty() => o,
        _ => return RepoKind::Local,
    };

    let lower = origin.to_ascii_lowercase();
    if REMOTE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        return RepoKind::RemoteGit;
    }

    if is_scp_like(origin) {
        return RepoKind::RemoteGit;
    }

    RepoKind::Local
}

/// `user@host:path` (git's SCP-like SSH syntax)
fn is_scp_like(origin: &str) -> bool {
    if origin.contains("://") {
        return false;
    }
    let Some((user_host, path)) = origin.split_once(':') else {
        return false;
    };
    let Some((user, host)) = user_host.split_once('@') else {
        return false;
    };
    !user.is_empty()
        && !host.is_empty()
        && !path.is_empty()
        && !user_host.contains('/')
        && !user_host.contains('\\')
        && !user_host.contains(char::is_whitespace)
}

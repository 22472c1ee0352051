//! Master clone validity probes
//!
//! Reconciliation needs to know whether a repo's live master clone is
//! usable. How that is judged is configurable: `exists` accepts any
//! non-empty directory, `git_marker` additionally requires a `.git` entry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fs_utils;

/// Decides whether a master clone directory is a usable working copy
pub trait MasterProbe: Send + Sync {
    fn is_valid(&self, master_path: &Path) -> bool;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Directory exists and is not empty
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistenceProbe;

impl MasterProbe for ExistenceProbe {
    fn is_valid(&self, master_path: &Path) -> bool {
        fs_utils::is_non_empty_dir(master_path)
    }

    fn name(&self) -> &'static str {
        "exists"
    }
}

/// Directory contains a `.git` directory or gitfile
#[derive(Debug, Clone, Copy, Default)]
pub struct GitMarkerProbe;

impl MasterProbe for GitMarkerProbe {
    fn is_valid(&self, master_path: &Path) -> bool {
        master_path.is_dir() && master_path.join(".git").exists()
    }

    fn name(&self) -> &'static str {
        "git_marker"
    }
}

/// Probe selection from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Exists,
    #[default]
    GitMarker,
}

impl ProbeKind {
    pub fn build(self) -> Box<dyn MasterProbe> {
        match self {
            ProbeKind::Exists => Box::new(ExistenceProbe),
            ProbeKind::GitMarker => Box::new(GitMarkerProbe),
        }
    }
}

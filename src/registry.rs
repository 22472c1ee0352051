//! Global registry of managed golden repos
//!
//! One JSON document per registered repo under
//! `<data_dir>/registry/<alias>.json`. A record is written once on
//! registration and removed on de-registration; it is never edited.
//!
//! The registry is also where caller-supplied identifiers are normalized:
//! [`GlobalRegistry::resolve_global_alias`] accepts `repo` or `repo-global`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::classify::{classify_origin, RepoKind};
use crate::error::{GoldenRepoError, Result};
use crate::fs_utils;
use crate::naming;

/// A registered, managed repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRepoRecord {
    /// Canonical alias (`repo-global`)
    pub alias: String,
    /// Short repo name
    pub repo_name: String,
    /// Remote URL, `local://` marker, bare path, or nothing
    #[serde(default)]
    pub origin: Option<String>,
    /// Live master clone (remote repos) or live directory (local repos)
    pub master_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl GlobalRepoRecord {
    /// Local vs remote-git, derived from the origin
    pub fn kind(&self) -> RepoKind {
        classify_origin(self.origin.as_deref())
    }
}

/// Durable catalog of golden repos
pub struct GlobalRegistry {
    dir: PathBuf,
    write_guard: Mutex<()>,
}

impl GlobalRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{}.json", alias))
    }

    /// Register a repo under `alias`.
    ///
    /// Reserved aliases (see [`naming::RESERVED_ALIASES`]) are only accepted
    /// with `allow_reserved`, which system-internal repos pass.
    pub fn register_global_repo(
        &self,
        repo_name: &str,
        alias: &str,
        origin: Option<&str>,
        master_path: &Path,
        allow_reserved: bool,
    ) -> Result<GlobalRepoRecord> {
        naming::validate_repo_name(repo_name)?;
        naming::validate_name(alias)?;
        if naming::is_reserved(alias) && !allow_reserved {
            return Err(GoldenRepoError::ReservedName {
                alias: alias.to_string(),
            });
        }

        let _guard = self.write_guard.lock();
        let path = self.record_path(alias);
        if path.exists() {
            return Err(GoldenRepoError::RepoExists {
                alias: alias.to_string(),
            });
        }

        let record = GlobalRepoRecord {
            alias: alias.to_string(),
            repo_name: repo_name.to_string(),
            origin: origin.map(str::to_string).filter(|o| !o.trim().is_empty()),
            master_path: master_path.to_path_buf(),
            created_at: Utc::now(),
        };
        fs_utils::write_json_atomic(&path, &record)?;
        tracing::info!(
            "Registered golden repo {} ({}) at {}",
            alias,
            record.kind(),
            master_path.display()
        );
        Ok(record)
    }

    /// Exact lookup by alias
    pub fn get_global_repo(&self, alias: &str) -> Result<Option<GlobalRepoRecord>> {
        if naming::validate_name(alias).is_err() {
            return Ok(None);
        }
        fs_utils::read_json(&self.record_path(alias))
    }

    /// All registered repos sorted by alias. Unreadable documents are logged and skipped.
    pub fn list_global_repos(&self) -> Result<Vec<GlobalRepoRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GoldenRepoError::io(&self.dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs_utils::read_json::<GlobalRepoRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    "Skipping unreadable registry document {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        records.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(records)
    }

    /// Remove a repo from the registry. Unknown aliases are `NotFound`.
    pub fn unregister(&self, alias: &str) -> Result<GlobalRepoRecord> {
        let _guard = self.write_guard.lock();
        let record = self
            .get_global_repo(alias)?
            .ok_or_else(|| GoldenRepoError::NotFound {
                identifier: alias.to_string(),
            })?;
        fs_utils::remove_file_if_exists(&self.record_path(alias))?;
        tracing::info!("Unregistered golden repo {}", alias);
        Ok(record)
    }

    /// Resolve a bare or canonical identifier to a registered alias.
    ///
    /// 1. identifier as-is
    /// 2. identifier + `-global`
    /// 3. `NotFound` naming the original identifier
    pub fn resolve_global_alias(&self, identifier: &str) -> Result<String> {
        Ok(self.resolve_global_repo(identifier)?.alias)
    }

    /// Like [`resolve_global_alias`](Self::resolve_global_alias) but returns the full record
    pub fn resolve_global_repo(&self, identifier: &str) -> Result<GlobalRepoRecord> {
        if let Some(record) = self.get_global_repo(identifier)? {
            return Ok(record);
        }

        if !naming::is_canonical(identifier) {
            let canonical = naming::canonical_alias(identifier);
            if let Some(record) = self.get_global_repo(&canonical)? {
                return Ok(record);
            }
        }

        Err(GoldenRepoError::NotFound {
            identifier: identifier.to_string(),
        })
    }
}

//! Alias store: where readers currently look for each golden repo
//!
//! One JSON document per alias under `<data_dir>/aliases/<alias>.json`.
//! Records are never edited in place; every change writes a fresh document
//! and renames it over the old one, so a concurrent reader sees either the
//! previous record or the new one in full.
//!
//! There is no logical locking here. Callers that swap an alias to a new
//! snapshot serialize through [`crate::lock::WriteLockCoordinator`]; the
//! internal mutex only keeps same-process writers from racing on the
//! read-modify-write of a single document.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{GoldenRepoError, Result};
use crate::fs_utils;
use crate::naming;

/// Published location of a golden repo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// Canonical alias (`repo-global`)
    pub alias: String,
    /// Directory readers resolve the alias to
    pub target_path: PathBuf,
    /// Short repo name the alias belongs to
    pub repo_name: String,
    pub created_at: DateTime<Utc>,
    /// Last successful refresh check (updated even when nothing changed)
    pub last_refresh: DateTime<Utc>,
    /// Upstream revision the published target was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Durable alias -> target mapping
pub struct AliasManager {
    dir: PathBuf,
    write_guard: Mutex<()>,
}

impl AliasManager {
    /// Create a manager storing its documents in `dir`
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

    /// Create a new alias. Fails if the alias already exists.
    pub fn create_alias(
        &self,
        alias: &str,
        target_path: &Path,
        repo_name: &str,
    ) -> Result<AliasRecord> {
        naming::validate_name(alias)?;
        ensure_target(alias, target_path)?;

        let _guard = self.write_guard.lock();
        let path = self.record_path(alias);
        if path.exists() {
            return Err(GoldenRepoError::AliasExists {
                alias: alias.to_string(),
            });
        }

        let now = Utc::now();
        let record = AliasRecord {
            alias: alias.to_string(),
            target_path: target_path.to_path_buf(),
            repo_name: repo_name.to_string(),
            created_at: now,
            last_refresh: now,
            revision: None,
        };
        fs_utils::write_json_atomic(&path, &record)?;
        tracing::info!("Created alias {} -> {}", alias, target_path.display());
        Ok(record)
    }

    /// Exact lookup of an alias's target path (no suffix normalization).
    ///
    /// Returns `Ok(None)` for an unknown alias. A record whose target
    /// directory has disappeared fails closed with `AliasTargetMissing`.
    pub fn read_alias(&self, alias: &str) -> Result<Option<PathBuf>> {
        let Some(record) = self.get_record(alias)? else {
            return Ok(None);
        };
        ensure_target(alias, &record.target_path)?;
        Ok(Some(record.target_path))
    }

    /// Full record for an alias, without checking its target
    pub fn get_record(&self, alias: &str) -> Result<Option<AliasRecord>> {
        if naming::validate_name(alias).is_err() {
            return Ok(None);
        }
        fs_utils::read_json(&self.record_path(alias))
    }

    /// Atomically point an alias at a new target, keeping its revision
    pub fn update_alias(&self, alias: &str, new_target: &Path) -> Result<AliasRecord> {
        ensure_target(alias, new_target)?;
        self.replace(alias, |record| {
            record.target_path = new_target.to_path_buf();
        })
    }

    /// Atomically point an alias at a new target built from `revision`
    pub fn update_alias_with_revision(
        &self,
        alias: &str,
        new_target: &Path,
        revision: &str,
    ) -> Result<AliasRecord> {
        ensure_target(alias, new_target)?;
        self.replace(alias, |record| {
            record.target_path = new_target.to_path_buf();
            record.revision = Some(revision.to_string());
        })
    }

    /// Heartbeat: bump `last_refresh` only
    pub fn touch_alias(&self, alias: &str) -> Result<AliasRecord> {
        self.replace(alias, |_| {})
    }

    /// Remove an alias document; returns whether it existed
    pub fn delete_alias(&self, alias: &str) -> Result<bool> {
        naming::validate_name(alias)?;
        let _guard = self.write_guard.lock();
        fs_utils::remove_file_if_exists(&self.record_path(alias))
    }

    /// All alias records, sorted by alias. Unreadable documents are skipped.
    pub fn list_aliases(&self) -> Result<Vec<AliasRecord>> {
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
            match fs_utils::read_json::<AliasRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable alias document {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(records)
    }

    fn replace(&self, alias: &str, apply: impl FnOnce(&mut AliasRecord)) -> Result<AliasRecord> {
        let _guard = self.write_guard.lock();
        let mut record = self
            .get_record(alias)?
            .ok_or_else(|| GoldenRepoError::NotFound {
                identifier: alias.to_string(),
            })?;
        apply(&mut record);
        record.last_refresh = Utc::now();
        fs_utils::write_json_atomic(&self.record_path(alias), &record)?;
        Ok(record)
    }
}

fn ensure_target(alias: &str, target: &Path) -> Result<()> {
    if target.is_dir() {
        Ok(())
    } else {
        Err(GoldenRepoError::AliasTargetMissing {
            alias: alias.to_string(),
            path: target.to_path_buf(),
        })
    }
}

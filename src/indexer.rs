//! Index build invocation
//!
//! The indexing engines themselves live outside this crate. A refresh only
//! needs to run "build every enabled index type against this directory"
//! and learn whether it worked. [`CommandIndexBuilder`] does that by running
//! one configured command per index type with `{path}` substituted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{GoldenRepoError, Result};

/// Placeholder replaced with the directory being indexed
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Kinds of index a golden repo can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Semantic,
    FullText,
    Temporal,
    CodeIntel,
}

impl IndexType {
    pub const ALL: [IndexType; 4] = [
        IndexType::Semantic,
        IndexType::FullText,
        IndexType::Temporal,
        IndexType::CodeIntel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndexType::Semantic => "semantic",
            IndexType::FullText => "full_text",
            IndexType::Temporal => "temporal",
            IndexType::CodeIntel => "code_intel",
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = GoldenRepoError;

    fn from_str(s: &str) -> Result<Self> {
        IndexType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| GoldenRepoError::Config {
                message: format!(
                    "Unknown index type '{}'. Must be one of: semantic, full_text, temporal, code_intel",
                    s
                ),
            })
    }
}

/// Timing of one index type's build
#[derive(Debug, Clone)]
pub struct IndexTiming {
    pub index_type: IndexType,
    pub elapsed: Duration,
}

/// Result of building all requested index types
#[derive(Debug, Clone, Default)]
pub struct IndexBuildReport {
    pub timings: Vec<IndexTiming>,
    pub elapsed: Duration,
}

/// Builds indexes against a directory. Blocking.
pub trait IndexBuilder: Send + Sync {
    /// Build each of `index_types` against `path`, stopping at the first failure
    fn build(&self, path: &Path, index_types: &[IndexType]) -> Result<IndexBuildReport>;
}

/// Runs one external command per index type
#[derive(Debug, Clone, Default)]
pub struct CommandIndexBuilder {
    commands: BTreeMap<IndexType, Vec<String>>,
}

impl CommandIndexBuilder {
    /// `commands` maps an index type to its argv; `{path}` is substituted
    pub fn new(commands: BTreeMap<IndexType, Vec<String>>) -> Self {
        Self { commands }
    }

    fn run(&self, index_type: IndexType, path: &Path) -> Result<()> {
        let failure = |message: String| GoldenRepoError::IndexBuildFailure {
            index_type: index_type.to_string(),
            message,
        };

        let argv = self
            .commands
            .get(&index_type)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| failure("no command configured".to_string()))?;

        let path_str = path.to_string_lossy();
        let args: Vec<String> = argv[1..]
            .iter()
            .map(|a| a.replace(PATH_PLACEHOLDER, &path_str))
            .collect();

        tracing::debug!("Running {} index build: {} {:?}", index_type, argv[0], args);
        let output = Command::new(&argv[0])
            .args(&args)
            .current_dir(path)
            .output()
            .map_err(|e| failure(format!("Failed to execute {}: {}", argv[0], e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!(
                "{} exited with {}: {}",
                argv[0],
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl IndexBuilder for CommandIndexBuilder {
    fn build(&self, path: &Path, index_types: &[IndexType]) -> Result<IndexBuildReport> {
        let started = Instant::now();
        let mut report = IndexBuildReport::default();

        for &index_type in index_types {
            let type_started = Instant::now();
            self.run(index_type, path)?;
            let elapsed = type_started.elapsed();
            tracing::info!(
                "Built {} index for {} in {}ms",
                index_type,
                path.display(),
                elapsed.as_millis()
            );
            report.timings.push(IndexTiming {
                index_type,
                elapsed,
            });
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }
}

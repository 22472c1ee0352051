//! Alias naming rules
//!
//! A golden repo named `repo` is published under the canonical alias
//! `repo-global`. Names double as file names for the persisted documents,
//! so they are restricted to a file-name safe alphabet.

use crate::error::{GoldenRepoError, Result};

/// Reserved suffix that turns a repo name into its canonical alias
pub const CANONICAL_SUFFIX: &str = "-global";

/// Aliases reserved for system-internal repositories
pub const RESERVED_ALIASES: &[&str] = &["meta-global"];

const MAX_NAME_LEN: usize = 128;

/// Canonical alias for a repo name (`repo` -> `repo-global`)
pub fn canonical_alias(repo_name: &str) -> String {
    if is_canonical(repo_name) {
        repo_name.to_string()
    } else {
        format!("{}{}", repo_name, CANONICAL_SUFFIX)
    }
}

/// Whether an identifier already carries the canonical suffix
pub fn is_canonical(identifier: &str) -> bool {
    identifier.len() > CANONICAL_SUFFIX.len() && identifier.ends_with(CANONICAL_SUFFIX)
}

/// Repo name for an alias (`repo-global` -> `repo`); non-canonical input is returned as-is
pub fn repo_name_from_alias(alias: &str) -> &str {
    if is_canonical(alias) {
        &alias[..alias.len() - CANONICAL_SUFFIX.len()]
    } else {
        alias
    }
}

/// Whether an alias is reserved for system repositories
pub fn is_reserved(alias: &str) -> bool {
    RESERVED_ALIASES.contains(&alias)
}

/// Validate that a name is usable as an alias, repo name and file name
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| GoldenRepoError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 128 characters"));
    }
    if name.starts_with('.') {
        return Err(invalid("name must not start with '.'"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(&format!("character '{}' is not allowed", c)));
    }
    Ok(())
}

/// Validate a repo name: file-name safe and without the canonical suffix
pub fn validate_repo_name(repo_name: &str) -> Result<()> {
    validate_name(repo_name)?;
    if repo_name.ends_with(CANONICAL_SUFFIX) {
        return Err(GoldenRepoError::InvalidName {
            name: repo_name.to_string(),
            reason: format!("repo name must not end with '{}'", CANONICAL_SUFFIX),
        });
    }
    Ok(())
}

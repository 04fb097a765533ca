// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Persisted per-dependency state and content fingerprints.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./state_test.rs"]
mod state_test;

/// Well-known filename for dependency state records.
pub const STATE_FILENAME: &str = "extdep_state.yaml";

/// State file API version.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum StateApiVersion {
    #[default]
    #[serde(rename = "sdenv/v0/state")]
    V0,
}

/// Metadata about when and where the dependency was last updated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UpdateMetadata {
    pub timestamp: DateTime<Utc>,
    pub sdenv_version: String,
    pub hostname: String,
}

impl UpdateMetadata {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            sdenv_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// State record stored next to a materialized dependency.
///
/// Operators may edit `verify` by hand to opt a dependency out of drift
/// checks; the file is re-read on every verification.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DependencyState {
    #[serde(default)]
    pub api: StateApiVersion,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    pub name: String,

    pub version: String,

    #[serde(default = "default_verify")]
    pub verify: bool,

    /// SHA-256 over the materialized payload, see [`fingerprint_dir`].
    pub fingerprint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<UpdateMetadata>,
}

fn default_verify() -> bool {
    true
}

impl DependencyState {
    /// Load a state record, returning `None` when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let yaml = match std::fs::read_to_string(path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::ReadFailed {
                    path: path.to_path_buf(),
                    error: e,
                });
            }
        };

        serde_yaml::from_str(&yaml)
            .map(Some)
            .map_err(|error| Error::InvalidState {
                path: path.to_path_buf(),
                error,
            })
    }

    /// Write the record by replacing the target file in one step.
    ///
    /// Readers either see the previous record or this one, never a
    /// partially written file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let parent = path.parent().ok_or_else(|| {
            Error::ValidationFailed(format!("State path has no parent: {}", path.display()))
        })?;
        std::fs::create_dir_all(parent)?;

        let yaml = serde_yaml::to_string(self).map_err(|error| Error::InvalidState {
            path: path.to_path_buf(),
            error,
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".extdep_state")
            .suffix(".tmp")
            .tempfile_in(parent)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }
}

/// Hash the contents of a materialized payload directory.
///
/// Covers relative paths, file contents and symlink targets in walk order.
/// Version-control metadata (`.git`) is excluded so that fetch bookkeeping
/// does not register as drift.
pub fn fingerprint_dir<P: AsRef<Path>>(dir: P) -> Result<String> {
    let dir = dir.as_ref();
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|error| Error::WalkFailed {
            path: dir.to_path_buf(),
            error,
        })?;
        if entry.depth() == 0 {
            continue;
        }

        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let rel = rel.to_string_lossy().replace('\\', "/");
        let file_type = entry.file_type();

        if file_type.is_dir() {
            hasher.update(b"d\0");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path()).map_err(|e| Error::ReadFailed {
                path: entry.path().to_path_buf(),
                error: e,
            })?;
            hasher.update(b"l\0");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            hasher.update(target.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        } else {
            let mut file = std::fs::File::open(entry.path()).map_err(|e| Error::ReadFailed {
                path: entry.path().to_path_buf(),
                error: e,
            })?;
            let mut content = Sha256::new();
            std::io::copy(&mut file, &mut content).map_err(|e| Error::ReadFailed {
                path: entry.path().to_path_buf(),
                error: e,
            })?;
            hasher.update(b"f\0");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            hasher.update(content.finalize());
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Registry of tool and dependency versions seen during a session.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./version_test.rs"]
mod version_test;

/// What kind of thing a reported version describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Tool,
    Dependency,
    Info,
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool => f.write_str("tool"),
            Self::Dependency => f.write_str("dependency"),
            Self::Info => f.write_str("info"),
        }
    }
}

/// A single reported version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionEntry {
    pub name: String,
    pub version: String,
    pub kind: VersionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Append-only version registry owned by one session.
///
/// Reporting the same name twice is fine as long as the version agrees.
#[derive(Debug, Default)]
pub struct VersionAggregator {
    entries: Mutex<BTreeMap<String, VersionEntry>>,
}

impl VersionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a version, failing if `name` was already seen at another one.
    pub fn report(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        kind: VersionKind,
        path: Option<PathBuf>,
    ) -> Result<()> {
        let name = name.into();
        let version = version.into();
        let mut entries = self.lock();

        if let Some(existing) = entries.get(&name) {
            if existing.version != version {
                return Err(Error::VersionConflict {
                    name,
                    existing: existing.version.clone(),
                    reported: version,
                });
            }
            return Ok(());
        }

        tracing::debug!(name = %name, version = %version, %kind, "version reported");
        entries.insert(
            name.clone(),
            VersionEntry {
                name,
                version,
                kind,
                path,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<VersionEntry> {
        self.lock().get(name).cloned()
    }

    /// All entries, ordered by name.
    pub fn snapshot(&self) -> Vec<VersionEntry> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget everything reported so far.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, VersionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

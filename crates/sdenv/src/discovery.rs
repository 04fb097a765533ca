// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Discovery algorithm for finding and loading descriptor files.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::dependency::STAGING_PREFIX;
use crate::descriptor::{Descriptor, DescriptorFileKind};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./discovery_test.rs"]
mod discovery_test;

/// Options for discovery behavior.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Directory names that are never descended into.
    pub ignore_dirs: Vec<String>,

    /// Follow symlinked directories while walking.
    pub follow_links: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ignore_dirs: vec![".git".to_string()],
            follow_links: false,
        }
    }
}

/// Discover every descriptor under `workspace_root`.
///
/// The walk is sorted by file name, so the result order is stable for an
/// unchanged tree. Any malformed descriptor fails the whole call.
pub fn discover_descriptors<P: AsRef<Path>>(
    workspace_root: P,
    options: &DiscoveryOptions,
) -> Result<Vec<Descriptor>> {
    let root = resolve_workspace_root(workspace_root.as_ref())?;
    let mut descriptors = Vec::new();

    let walker = WalkDir::new(&root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored(entry, options));

    for entry in walker {
        let entry = entry.map_err(|error| Error::WalkFailed {
            path: root.clone(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = DescriptorFileKind::from_path(entry.path()) else {
            continue;
        };

        let path = entry.path();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::ReadFailed {
            path: path.to_path_buf(),
            error: e,
        })?;
        let descriptor = Descriptor::from_yaml(kind, yaml, path)?;

        tracing::debug!(
            path = %path.display(),
            kind = descriptor.kind_name(),
            scope = %descriptor.scope,
            "found descriptor"
        );
        descriptors.push(descriptor);
    }

    tracing::debug!(
        root = %root.display(),
        count = descriptors.len(),
        "descriptor discovery complete"
    );
    Ok(descriptors)
}

/// Canonicalize the workspace root, failing if it is not a directory.
pub(crate) fn resolve_workspace_root(path: &Path) -> Result<PathBuf> {
    let root =
        dunce::canonicalize(path).map_err(|_| Error::WorkspaceNotFound(path.to_path_buf()))?;
    if !root.is_dir() {
        return Err(Error::WorkspaceNotFound(root));
    }
    Ok(root)
}

fn is_ignored(entry: &DirEntry, options: &DiscoveryOptions) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let Some(name) = entry.file_name().to_str() else {
        return false;
    };
    name.starts_with(STAGING_PREFIX) || options.ignore_dirs.iter().any(|ignored| ignored == name)
}

// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Override resolution for the active descriptor set.
//!
//! Conflicts are detected by grouping on the conflicting key, so the
//! outcome never depends on the order in which descriptors were found.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;

use crate::descriptor::Descriptor;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./merge_test.rs"]
mod merge_test;

/// Record of one override applied while merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedOverride {
    /// Identifier slot that received the replacement.
    pub identifier: String,
    /// Descriptor whose body was discarded.
    pub replaced: PathBuf,
    /// Descriptor whose body now fills the slot.
    pub replacement: PathBuf,
}

/// Merged descriptor set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDescriptors {
    /// Identified descriptors keyed by identifier, after overrides.
    pub identified: BTreeMap<String, Descriptor>,

    /// Descriptors without an identifier, in discovery order.
    pub anonymous: Vec<Descriptor>,

    /// Overrides that were applied, in identifier order.
    pub overrides: Vec<AppliedOverride>,
}

impl ResolvedDescriptors {
    /// Identified descriptors (ascending identifier) followed by anonymous ones.
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.identified.values().chain(self.anonymous.iter())
    }

    /// Descriptors declaring an external dependency, in resolution order.
    pub fn ext_deps(&self) -> impl Iterator<Item = &Descriptor> {
        self.iter().filter(|d| d.as_ext_dep().is_some())
    }

    pub fn get(&self, identifier: &str) -> Option<&Descriptor> {
        self.identified.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.identified.len() + self.anonymous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merge active descriptors, applying overrides and rejecting conflicts.
pub fn merge_descriptors(descriptors: &[Descriptor]) -> Result<ResolvedDescriptors> {
    let mut by_id: BTreeMap<&str, Vec<&Descriptor>> = BTreeMap::new();
    let mut anonymous = Vec::new();
    for descriptor in descriptors {
        match descriptor.identifier.as_deref() {
            Some(id) => by_id.entry(id).or_default().push(descriptor),
            None => anonymous.push(descriptor),
        }
    }

    for (id, group) in &by_id {
        if group.len() > 1 {
            return Err(Error::DuplicateIdentifier {
                identifier: id.to_string(),
                sources: sorted_sources(group),
            });
        }
    }
    let identified: BTreeMap<&str, &Descriptor> =
        by_id.into_iter().map(|(id, group)| (id, group[0])).collect();

    let mut by_target: BTreeMap<&str, Vec<&Descriptor>> = BTreeMap::new();
    for descriptor in descriptors {
        if let Some(target) = descriptor.override_id.as_deref() {
            by_target.entry(target).or_default().push(descriptor);
        }
    }

    let mut overrider_of: BTreeMap<&str, &Descriptor> = BTreeMap::new();
    for (target, group) in by_target {
        if group.len() > 1 {
            return Err(Error::DuplicateOverride {
                override_id: target.to_string(),
                sources: sorted_sources(&group),
            });
        }
        if identified.contains_key(target) {
            overrider_of.insert(target, group[0]);
        } else {
            tracing::warn!(
                path = %group[0].source_path.display(),
                override_id = target,
                "override target not found, keeping descriptor as-is"
            );
        }
    }

    let overrides_something = |d: &Descriptor| {
        d.override_id
            .as_deref()
            .is_some_and(|target| overrider_of.contains_key(target))
    };

    let mut resolved = ResolvedDescriptors::default();
    let mut reached = BTreeSet::new();

    // Every slot is anchored by a descriptor that does not itself override
    // anything; follow the override chain from there to find its body.
    for (&id, &anchor) in &identified {
        if overrides_something(anchor) {
            continue;
        }

        let mut winner = anchor;
        let mut current = Some(id);
        while let Some(target) = current {
            let Some(&next) = overrider_of.get(target) else {
                break;
            };
            tracing::debug!(
                identifier = id,
                replaced = %winner.source_path.display(),
                replacement = %next.source_path.display(),
                "applying override"
            );
            resolved.overrides.push(AppliedOverride {
                identifier: id.to_string(),
                replaced: winner.source_path.clone(),
                replacement: next.source_path.clone(),
            });
            reached.insert(target);
            winner = next;
            current = next.identifier.as_deref();
        }

        let mut body = winner.clone();
        body.identifier = Some(id.to_string());
        body.override_id = None;
        resolved.identified.insert(id.to_string(), body);
    }

    if reached.len() < overrider_of.len() {
        let identifiers = overrider_of
            .iter()
            .filter(|(target, _)| !reached.contains(*target))
            .map(|(_, overrider)| overrider.label())
            .collect();
        return Err(Error::OverrideCycle { identifiers });
    }

    resolved.anonymous = anonymous
        .into_iter()
        .filter(|d| !overrides_something(d))
        .cloned()
        .collect();

    Ok(resolved)
}

fn sorted_sources(group: &[&Descriptor]) -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = group.iter().map(|d| d.source_path.clone()).collect();
    sources.sort();
    sources
}

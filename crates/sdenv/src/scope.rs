// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Requested scopes and scope-based descriptor filtering.

use std::fmt;

use crate::descriptor::Descriptor;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./scope_test.rs"]
mod scope_test;

/// Ordered, duplicate-free sequence of requested scope names.
///
/// Names are compared case-insensitively but kept as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    scopes: Vec<String>,
}

impl ScopeSet {
    /// Build a scope set, failing on the first case-insensitive duplicate.
    pub fn new<I, S>(scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for scope in scopes {
            let scope = scope.into();
            if set.contains(&scope) {
                return Err(Error::DuplicateScope { scope });
            }
            set.scopes.push(scope);
        }
        Ok(set)
    }

    /// Whether `scope` matches any requested entry.
    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s.eq_ignore_ascii_case(scope))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scopes.join(","))
    }
}

/// Keep only the descriptors active for `scopes`, preserving order.
pub fn filter_by_scope(descriptors: Vec<Descriptor>, scopes: &ScopeSet) -> Vec<Descriptor> {
    descriptors
        .into_iter()
        .filter(|descriptor| {
            let active = scopes.contains(&descriptor.scope);
            if !active {
                tracing::debug!(
                    path = %descriptor.source_path.display(),
                    scope = %descriptor.scope,
                    "descriptor scope not requested"
                );
            }
            active
        })
        .collect()
}

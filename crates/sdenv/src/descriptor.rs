// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Descriptor file parsing and data types.
//!
//! Two kinds of descriptor are recognized by file name:
//!
//! - `*_path_env.yaml` contributes a directory to the environment buckets.
//! - `*_ext_dep.yaml` declares an external dependency that is materialized
//!   next to the descriptor and verified for drift.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./descriptor_test.rs"]
mod descriptor_test;

/// Scope assigned to descriptors that do not name one.
pub const DEFAULT_SCOPE: &str = "global";

/// File stem suffix of path-environment descriptors.
pub const PATH_ENV_SUFFIX: &str = "_path_env";

/// File stem suffix of external-dependency descriptors.
pub const EXT_DEP_SUFFIX: &str = "_ext_dep";

/// Extensions accepted for descriptor files.
pub const DESCRIPTOR_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Output bucket selectors carried by a descriptor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EnvFlag {
    /// Append the directory to the executable search path.
    SetPath,
    /// Append the directory to the interpreter search path.
    SetPypath,
    /// Set `var_name` to the directory as a build variable.
    SetBuildVar,
    /// Set `var_name` to the directory as a shell variable.
    SetShellVar,
}

impl EnvFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetPath => "set_path",
            Self::SetPypath => "set_pypath",
            Self::SetBuildVar => "set_build_var",
            Self::SetShellVar => "set_shell_var",
        }
    }

    /// Whether this flag needs a `var_name` to be meaningful.
    pub fn requires_var_name(&self) -> bool {
        matches!(self, Self::SetBuildVar | Self::SetShellVar)
    }
}

impl fmt::Display for EnvFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mechanism used to materialize an external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    Git,
    Nuget,
}

impl fmt::Display for DepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git => f.write_str("git"),
            Self::Nuget => f.write_str("nuget"),
        }
    }
}

/// Descriptor kind as determined by the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFileKind {
    PathEnv,
    ExtDep,
}

impl DescriptorFileKind {
    /// Classify a path by naming convention, if it is a descriptor at all.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if !DESCRIPTOR_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
        {
            return None;
        }

        let stem = path.file_stem()?.to_str()?;
        if stem.ends_with(PATH_ENV_SUFFIX) {
            Some(Self::PathEnv)
        } else if stem.ends_with(EXT_DEP_SUFFIX) {
            Some(Self::ExtDep)
        } else {
            None
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::PathEnv => PATH_ENV_SUFFIX,
            Self::ExtDep => EXT_DEP_SUFFIX,
        }
    }
}

/// Body of a `*_path_env` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PathEnv {
    /// Variable name used by `set_build_var` / `set_shell_var`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_name: Option<String>,

    /// Directory to publish. Defaults to the descriptor's own directory.
    /// Relative paths are resolved against the descriptor's directory.
    #[serde(default, rename = "path", skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Buckets receiving this entry.
    pub flags: BTreeSet<EnvFlag>,
}

/// Body of a `*_ext_dep` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtDep {
    #[serde(rename = "type")]
    pub dep_type: DepType,

    /// Dependency name, also the name of the materialized payload directory.
    pub name: String,

    /// Version, tag or commit expected on disk.
    #[serde(deserialize_with = "scalar_string")]
    pub version: String,

    /// Clone URL or package feed handed to the fetcher.
    pub source: String,

    /// Whether drift checking applies to this dependency.
    #[serde(default = "default_verify")]
    pub verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_name: Option<String>,

    /// Optional buckets receiving the materialized payload directory.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<EnvFlag>,
}

/// Accept unquoted numeric versions such as `version: 1.2`.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar version, found {other:?}"
        ))),
    }
}

fn default_verify() -> bool {
    true
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

/// Variant-specific part of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DescriptorKind {
    PathEnv(PathEnv),
    ExtDep(ExtDep),
}

/// Fields shared by every descriptor kind, read in the first parsing stage.
#[derive(Deserialize)]
struct DescriptorHeader {
    #[serde(default, alias = "identifier")]
    id: Option<String>,

    #[serde(default = "default_scope")]
    scope: String,

    #[serde(default)]
    override_id: Option<String>,
}

/// A parsed descriptor file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    /// Unique key. `None` excludes the descriptor from overrides.
    #[serde(rename = "id", skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Scope under which the descriptor is active.
    pub scope: String,

    /// Identifier of the descriptor this one replaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_id: Option<String>,

    /// Absolute path of the file this was loaded from.
    pub source_path: PathBuf,

    #[serde(flatten)]
    pub kind: DescriptorKind,
}

impl Descriptor {
    /// Parse a descriptor of the given kind from YAML (or JSON) text.
    pub fn from_yaml<S: AsRef<str>>(
        kind: DescriptorFileKind,
        yaml: S,
        source_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let source_path = source_path.into();
        let invalid = |error| Error::InvalidDescriptor {
            path: source_path.clone(),
            error,
        };

        // Stage 1: generic value and the shared header
        let value: serde_yaml::Value = serde_yaml::from_str(yaml.as_ref()).map_err(invalid)?;
        let header: DescriptorHeader =
            serde_yaml::from_value(value.clone()).map_err(invalid)?;

        // Stage 2: variant body
        let kind = match kind {
            DescriptorFileKind::PathEnv => {
                DescriptorKind::PathEnv(serde_yaml::from_value(value).map_err(invalid)?)
            }
            DescriptorFileKind::ExtDep => {
                DescriptorKind::ExtDep(serde_yaml::from_value(value).map_err(invalid)?)
            }
        };

        Ok(Self {
            identifier: non_empty(header.id),
            scope: header.scope,
            override_id: non_empty(header.override_id),
            source_path,
            kind,
        })
    }

    /// Load a descriptor from a file, classifying it by file name.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let kind = DescriptorFileKind::from_path(path).ok_or_else(|| {
            Error::ValidationFailed(format!(
                "{} is not named like a descriptor (*{}.yaml or *{}.yaml)",
                path.display(),
                PATH_ENV_SUFFIX,
                EXT_DEP_SUFFIX
            ))
        })?;

        let yaml = std::fs::read_to_string(path).map_err(|e| Error::ReadFailed {
            path: path.to_path_buf(),
            error: e,
        })?;

        Self::from_yaml(kind, yaml, path)
    }

    /// Directory containing the descriptor file.
    pub fn directory(&self) -> &Path {
        self.source_path.parent().unwrap_or_else(|| Path::new("/"))
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            DescriptorKind::PathEnv(_) => "path_env",
            DescriptorKind::ExtDep(_) => "ext_dep",
        }
    }

    pub fn flags(&self) -> &BTreeSet<EnvFlag> {
        match &self.kind {
            DescriptorKind::PathEnv(p) => &p.flags,
            DescriptorKind::ExtDep(e) => &e.flags,
        }
    }

    pub fn var_name(&self) -> Option<&str> {
        match &self.kind {
            DescriptorKind::PathEnv(p) => p.var_name.as_deref(),
            DescriptorKind::ExtDep(e) => e.var_name.as_deref(),
        }
    }

    pub fn as_path_env(&self) -> Option<&PathEnv> {
        match &self.kind {
            DescriptorKind::PathEnv(p) => Some(p),
            DescriptorKind::ExtDep(_) => None,
        }
    }

    pub fn as_ext_dep(&self) -> Option<&ExtDep> {
        match &self.kind {
            DescriptorKind::ExtDep(e) => Some(e),
            DescriptorKind::PathEnv(_) => None,
        }
    }

    /// Short human-readable label for listings and logs.
    pub fn label(&self) -> String {
        match &self.identifier {
            Some(id) => id.clone(),
            None => self.source_path.display().to_string(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve a descriptor-relative path (absolute, home-relative, or relative).
pub fn resolve_path(raw: &str, base_dir: &Path) -> Result<PathBuf> {
    let path = if raw.starts_with('~') {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::ValidationFailed("Cannot resolve ~ without HOME".to_string())
        })?;
        let rel = raw.strip_prefix("~/").unwrap_or(raw.trim_start_matches('~'));
        home.join(rel)
    } else if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        base_dir.join(raw)
    };

    Ok(normalize(&path))
}

/// Lexically drop `.` components and fold `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.has_root() && out.parent().is_none() {
                    // `..` above the root is the root
                } else if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Aggregation of resolved descriptors into environment buckets.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::dependency::Dependency;
use crate::descriptor::{Descriptor, DescriptorKind, EnvFlag, resolve_path};
use crate::merge::ResolvedDescriptors;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./environment_test.rs"]
mod environment_test;

/// Build-side result of a bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildEnvironment {
    /// Executable search path entries, in resolution order.
    pub paths: Vec<PathBuf>,

    /// Interpreter search path entries, in resolution order.
    pub pypaths: Vec<PathBuf>,

    /// Build variables visible to the build step only.
    pub build_vars: BTreeMap<String, String>,
}

/// Shell-side result of a bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShellEnvironment {
    /// Variables exported to the shell.
    pub vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.pypaths.is_empty() && self.build_vars.is_empty()
    }
}

/// Convert resolved descriptors into build and shell environments.
///
/// Path entries keep resolution order and are never deduplicated.
pub fn aggregate(resolved: &ResolvedDescriptors) -> Result<(BuildEnvironment, ShellEnvironment)> {
    let mut build = BuildEnvironment::default();
    let mut shell = ShellEnvironment::default();

    for descriptor in resolved.iter() {
        let flags = descriptor.flags();
        if flags.is_empty() {
            continue;
        }

        let directory = published_directory(descriptor)?;
        let value = directory.display().to_string();

        for flag in flags {
            match flag {
                EnvFlag::SetPath => build.paths.push(directory.clone()),
                EnvFlag::SetPypath => build.pypaths.push(directory.clone()),
                EnvFlag::SetBuildVar => {
                    let name = required_var_name(descriptor, *flag)?;
                    set_var(&mut build.build_vars, name, &value, "build");
                }
                EnvFlag::SetShellVar => {
                    let name = required_var_name(descriptor, *flag)?;
                    set_var(&mut shell.vars, name, &value, "shell");
                }
            }
        }
    }

    Ok((build, shell))
}

/// Directory a descriptor contributes to the environment.
fn published_directory(descriptor: &Descriptor) -> Result<PathBuf> {
    match &descriptor.kind {
        DescriptorKind::PathEnv(path_env) => {
            let raw = path_env.directory.as_deref().unwrap_or(".");
            resolve_path(raw, descriptor.directory())
        }
        DescriptorKind::ExtDep(_) => Dependency::from_descriptor(descriptor)
            .map(|dep| dep.payload_dir())
            .ok_or_else(|| {
                Error::ValidationFailed(format!(
                    "{} is not an external dependency",
                    descriptor.source_path.display()
                ))
            }),
    }
}

fn required_var_name(descriptor: &Descriptor, flag: EnvFlag) -> Result<&str> {
    descriptor.var_name().ok_or_else(|| Error::MissingVarName {
        flag,
        path: descriptor.source_path.clone(),
    })
}

fn set_var(vars: &mut BTreeMap<String, String>, name: &str, value: &str, bucket: &str) {
    if let Some(previous) = vars.insert(name.to_string(), value.to_string()) {
        tracing::debug!(
            name,
            previous = %previous,
            value,
            bucket,
            "variable replaced by later descriptor"
        );
    }
}

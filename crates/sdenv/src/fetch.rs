// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Delegated materialization of external dependencies.
//!
//! sdenv never talks to the network itself. Each dependency type maps to a
//! [`Fetcher`] that places the dependency payload into a directory, usually
//! by running the corresponding command line tool.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::descriptor::{DepType, ExtDep};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./fetch_test.rs"]
mod fetch_test;

/// Places an external dependency's content on disk.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Materialize `dep` into `dest`.
    ///
    /// `dest` does not exist when this is called. Dropping the returned
    /// future must abandon the fetch; the caller discards `dest`.
    async fn fetch(&self, dep: &ExtDep, dest: &Path) -> Result<()>;
}

/// Clones a git repository and checks out the declared version.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    pub program: PathBuf,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    async fn fetch(&self, dep: &ExtDep, dest: &Path) -> Result<()> {
        let mut clone = Command::new(&self.program);
        clone
            .args(["clone", "--quiet", "--no-checkout"])
            .arg(&dep.source)
            .arg(dest);
        run_tool(clone, &dep.name).await?;

        let mut checkout = Command::new(&self.program);
        checkout
            .arg("-C")
            .arg(dest)
            .args(["checkout", "--quiet", "--detach"])
            .arg(&dep.version);
        run_tool(checkout, &dep.name).await
    }
}

/// Installs a NuGet package at the declared version.
#[derive(Debug, Clone)]
pub struct NugetFetcher {
    pub program: PathBuf,
}

impl Default for NugetFetcher {
    fn default() -> Self {
        Self {
            program: PathBuf::from("nuget"),
        }
    }
}

#[async_trait]
impl Fetcher for NugetFetcher {
    async fn fetch(&self, dep: &ExtDep, dest: &Path) -> Result<()> {
        // -ExcludeVersion installs into <output>/<name>, which is `dest`
        // when the payload directory is named after the package.
        let output_dir = dest.parent().ok_or_else(|| Error::FetchFailed {
            name: dep.name.clone(),
            message: format!("{} has no parent directory", dest.display()),
        })?;

        let mut install = Command::new(&self.program);
        install
            .arg("install")
            .arg(&dep.name)
            .arg("-Version")
            .arg(&dep.version)
            .arg("-Source")
            .arg(&dep.source)
            .arg("-OutputDirectory")
            .arg(output_dir)
            .args(["-ExcludeVersion", "-NonInteractive"]);
        run_tool(install, &dep.name).await?;

        let installed = output_dir.join(&dep.name);
        if installed != dest {
            tokio::fs::rename(&installed, dest).await?;
        }
        Ok(())
    }
}

async fn run_tool(mut cmd: Command, name: &str) -> Result<()> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    tracing::debug!(?cmd, "running fetch tool");

    let output = cmd.output().await.map_err(|e| Error::FetchFailed {
        name: name.to_string(),
        message: format!("failed to launch {:?}: {e}", cmd.as_std().get_program()),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::FetchFailed {
            name: name.to_string(),
            message: format!(
                "{:?} exited with {}: {}",
                cmd.as_std().get_program(),
                output.status,
                stderr.trim()
            ),
        });
    }
    Ok(())
}

/// Fetchers by dependency type.
#[derive(Clone)]
pub struct FetcherRegistry {
    fetchers: HashMap<DepType, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    /// A registry with no fetchers at all.
    pub fn empty() -> Self {
        Self {
            fetchers: HashMap::new(),
        }
    }

    /// Register (or replace) the fetcher used for `dep_type`.
    pub fn register(&mut self, dep_type: DepType, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(dep_type, fetcher);
    }

    pub fn get(&self, dep_type: DepType) -> Result<Arc<dyn Fetcher>> {
        self.fetchers
            .get(&dep_type)
            .cloned()
            .ok_or(Error::NoFetcher(dep_type))
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DepType::Git, Arc::new(GitFetcher::default()));
        registry.register(DepType::Nuget, Arc::new(NugetFetcher::default()));
        registry
    }
}

impl fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<String> = self.fetchers.keys().map(ToString::to_string).collect();
        types.sort();
        f.debug_struct("FetcherRegistry")
            .field("types", &types)
            .finish()
    }
}

// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Workspace sessions: bootstrap, update and verify entry points.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};

use crate::dependency::{
    Dependency, DependencyLocks, DependencyStatus, UpdateOutcome, update_dependency,
    verify_dependency,
};
use crate::descriptor::{DepType, Descriptor};
use crate::discovery::{DiscoveryOptions, discover_descriptors, resolve_workspace_root};
use crate::environment::{BuildEnvironment, ShellEnvironment, aggregate};
use crate::fetch::{Fetcher, FetcherRegistry};
use crate::merge::{ResolvedDescriptors, merge_descriptors};
use crate::scope::{ScopeSet, filter_by_scope};
use crate::version::{VersionAggregator, VersionKind};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./session_test.rs"]
mod session_test;

/// Default number of dependencies processed concurrently.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Options for [`Environment::update_dependencies`].
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Re-fetch dependencies that are already up to date.
    pub force: bool,
    /// Upper bound on concurrent updates.
    pub max_workers: usize,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            force: false,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Outcome of updating one dependency.
#[derive(Debug)]
pub struct UpdateReport {
    pub dependency: Dependency,
    pub result: Result<UpdateOutcome>,
}

/// Per-dependency outcomes of an update run, in resolution order.
#[derive(Debug, Default)]
pub struct UpdateSummary {
    pub reports: Vec<UpdateReport>,
}

impl UpdateSummary {
    pub fn is_success(&self) -> bool {
        self.reports.iter().all(|r| r.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Dependency, &Error)> {
        self.reports
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (&r.dependency, e)))
    }

    /// Number of dependencies that were (re)materialized.
    pub fn updated(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.result, Ok(UpdateOutcome::Updated(_))))
            .count()
    }
}

/// Status of one dependency at verification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub dependency: Dependency,
    pub status: DependencyStatus,
}

/// Per-dependency verification results, in resolution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub reports: Vec<VerifyReport>,
}

impl VerifySummary {
    /// True when every dependency is clean or opted out.
    pub fn passed(&self) -> bool {
        self.reports.iter().all(|r| r.status.passed())
    }

    pub fn failing(&self) -> impl Iterator<Item = &VerifyReport> {
        self.reports.iter().filter(|r| !r.status.passed())
    }
}

/// A workspace viewed through a fixed set of scopes.
///
/// Every operation re-reads descriptors and state from disk; nothing is
/// cached between calls. The version registry lives as long as the session.
#[derive(Debug)]
pub struct Environment {
    root: PathBuf,
    scopes: ScopeSet,
    discovery: DiscoveryOptions,
    fetchers: FetcherRegistry,
    locks: DependencyLocks,
    versions: Arc<VersionAggregator>,
}

impl Environment {
    /// Open a session on `root`, failing on a missing workspace or
    /// duplicate scopes.
    pub fn new<P, I, S>(root: P, scopes: I) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes = ScopeSet::new(scopes)?;
        let root = resolve_workspace_root(root.as_ref())?;
        tracing::debug!(root = %root.display(), %scopes, "opened workspace session");
        Ok(Self {
            root,
            scopes,
            discovery: DiscoveryOptions::default(),
            fetchers: FetcherRegistry::default(),
            locks: DependencyLocks::new(),
            versions: Arc::new(VersionAggregator::new()),
        })
    }

    pub fn with_discovery_options(mut self, options: DiscoveryOptions) -> Self {
        self.discovery = options;
        self
    }

    pub fn with_fetchers(mut self, fetchers: FetcherRegistry) -> Self {
        self.fetchers = fetchers;
        self
    }

    /// Replace the fetcher used for one dependency type.
    pub fn with_fetcher(mut self, dep_type: DepType, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.register(dep_type, fetcher);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn versions(&self) -> &Arc<VersionAggregator> {
        &self.versions
    }

    /// Descriptors active for this session's scopes, in discovery order.
    pub fn descriptors(&self) -> Result<Vec<Descriptor>> {
        let all = discover_descriptors(&self.root, &self.discovery)?;
        Ok(filter_by_scope(all, &self.scopes))
    }

    /// Active descriptors with overrides applied.
    pub fn resolve(&self) -> Result<ResolvedDescriptors> {
        merge_descriptors(&self.descriptors()?)
    }

    /// Resolve the workspace into build and shell environments.
    pub fn bootstrap(&self) -> Result<(BuildEnvironment, ShellEnvironment)> {
        let resolved = self.resolve()?;
        let (build, shell) = aggregate(&resolved)?;
        tracing::info!(
            descriptors = resolved.len(),
            paths = build.paths.len(),
            pypaths = build.pypaths.len(),
            build_vars = build.build_vars.len(),
            shell_vars = shell.vars.len(),
            "environment bootstrapped"
        );
        Ok((build, shell))
    }

    /// External dependencies that survive scope filtering and overrides.
    pub fn dependencies(&self) -> Result<Vec<Dependency>> {
        Ok(self
            .resolve()?
            .ext_deps()
            .filter_map(Dependency::from_descriptor)
            .collect())
    }

    /// Bring every active dependency up to date.
    ///
    /// Failures are collected per dependency and never stop the others.
    pub async fn update_dependencies(&self, options: &UpdateOptions) -> Result<UpdateSummary> {
        let dependencies = self.dependencies()?;
        tracing::info!(
            count = dependencies.len(),
            force = options.force,
            "updating external dependencies"
        );

        let updates = dependencies.into_iter().map(|dependency| async move {
            let result = self.update_one(&dependency, options.force).await;
            if let Err(err) = &result {
                tracing::error!(dependency = dependency.label(), "update failed: {err}");
            }
            UpdateReport { dependency, result }
        });

        let reports = futures::stream::iter(updates)
            .buffered(options.max_workers.max(1))
            .collect()
            .await;
        Ok(UpdateSummary { reports })
    }

    async fn update_one(&self, dependency: &Dependency, force: bool) -> Result<UpdateOutcome> {
        let fetcher = self.fetchers.get(dependency.spec.dep_type)?;
        // Claim the version first so a conflict never leaves a payload behind.
        self.versions.report(
            dependency.name(),
            &dependency.spec.version,
            VersionKind::Dependency,
            Some(dependency.payload_dir()),
        )?;
        update_dependency(dependency, fetcher.as_ref(), &self.locks, force).await
    }

    /// Check every active dependency against its recorded state.
    pub async fn verify(&self) -> Result<VerifySummary> {
        let dependencies = self.dependencies()?;
        let checks = dependencies.into_iter().map(|dependency| async move {
            let status = verify_dependency(&dependency, &self.locks).await?;
            Ok::<_, Error>(VerifyReport { dependency, status })
        });

        let reports: Vec<VerifyReport> = futures::stream::iter(checks)
            .buffered(DEFAULT_MAX_WORKERS)
            .try_collect()
            .await?;

        let summary = VerifySummary { reports };
        if summary.passed() {
            tracing::info!(count = summary.reports.len(), "all dependencies verified");
        } else {
            tracing::warn!(
                failing = summary.failing().count(),
                "dependencies failed verification"
            );
        }
        Ok(summary)
    }

    /// Forget versions reported during this session.
    pub fn teardown(&self) {
        self.versions.reset();
        self.locks.prune();
    }
}

/// Resolve `root` for `scopes` into build and shell environments.
pub fn bootstrap_environment<P, I, S>(
    root: P,
    scopes: I,
) -> Result<(BuildEnvironment, ShellEnvironment)>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Environment::new(root, scopes)?.bootstrap()
}

/// Update every active dependency with the default fetchers and options.
pub async fn update_dependencies<P, I, S>(root: P, scopes: I) -> Result<UpdateSummary>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Environment::new(root, scopes)?
        .update_dependencies(&UpdateOptions::default())
        .await
}

/// True when every active dependency passes verification.
pub async fn verify_environment<P, I, S>(root: P, scopes: I) -> Result<bool>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Ok(Environment::new(root, scopes)?.verify().await?.passed())
}

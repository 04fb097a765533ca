// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Materialization and drift checks for external dependencies.
//!
//! A dependency declared by `<dir>/<file>_ext_dep.yaml` with name `N` lives in
//! `<dir>/N_extdep/`: the payload is `N_extdep/N/` and the state record is
//! `N_extdep/extdep_state.yaml`. The state record is only written after a
//! payload has been fully materialized, so it never describes a version
//! that is not on disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::descriptor::{Descriptor, ExtDep};
use crate::fetch::Fetcher;
use crate::state::{DependencyState, STATE_FILENAME, StateApiVersion, UpdateMetadata, fingerprint_dir};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./dependency_test.rs"]
mod dependency_test;

/// Suffix of the directory holding a dependency's payload and state.
pub const CONTENTS_SUFFIX: &str = "_extdep";

/// Prefix of the scratch directories used while fetching.
pub const STAGING_PREFIX: &str = ".sdenv-staging";

/// An external dependency located in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub identifier: Option<String>,
    /// Descriptor file declaring this dependency.
    pub source_path: PathBuf,
    pub spec: ExtDep,
}

impl Dependency {
    /// View an ext-dep descriptor as a dependency.
    pub fn from_descriptor(descriptor: &Descriptor) -> Option<Self> {
        let spec = descriptor.as_ext_dep()?;
        Some(Self {
            identifier: descriptor.identifier.clone(),
            source_path: descriptor.source_path.clone(),
            spec: spec.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Identifier if present, otherwise the dependency name.
    pub fn label(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.spec.name)
    }

    pub fn contents_dir(&self) -> PathBuf {
        let base = self
            .source_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        base.join(format!("{}{CONTENTS_SUFFIX}", self.spec.name))
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.contents_dir().join(&self.spec.name)
    }

    pub fn state_path(&self) -> PathBuf {
        self.contents_dir().join(STATE_FILENAME)
    }

    pub fn load_state(&self) -> Result<Option<DependencyState>> {
        DependencyState::load(self.state_path())
    }
}

/// Why a materialized dependency no longer matches its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReason {
    /// The descriptor asks for a different version than was materialized.
    VersionChanged { expected: String, recorded: String },
    /// The payload directory is gone.
    PayloadMissing,
    /// Files in the payload were added, removed or modified.
    ContentsChanged,
    /// The state record exists but cannot be parsed.
    UnreadableState(String),
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionChanged { expected, recorded } => {
                write!(f, "version {recorded} is materialized, {expected} is declared")
            }
            Self::PayloadMissing => f.write_str("payload directory is missing"),
            Self::ContentsChanged => f.write_str("payload contents changed"),
            Self::UnreadableState(message) => write!(f, "state file unreadable: {message}"),
        }
    }
}

/// On-disk status of a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    /// No state record exists yet.
    Unmaterialized,
    /// The payload matches the recorded fingerprint and version.
    Clean,
    /// The payload or version drifted from the record.
    Dirty(DriftReason),
    /// The record opts out of verification.
    VerifySkipped,
}

impl DependencyStatus {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Clean | Self::VerifySkipped)
    }
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmaterialized => f.write_str("not materialized"),
            Self::Clean => f.write_str("clean"),
            Self::Dirty(reason) => write!(f, "dirty ({reason})"),
            Self::VerifySkipped => f.write_str("verify disabled"),
        }
    }
}

/// Inspect a dependency without modifying anything on disk.
///
/// A record with `verify: false` short-circuits before the payload is
/// looked at.
pub fn check_dependency(dep: &Dependency) -> Result<DependencyStatus> {
    let state = match dep.load_state() {
        Ok(Some(state)) => state,
        Ok(None) => return Ok(DependencyStatus::Unmaterialized),
        Err(Error::InvalidState { error, .. }) => {
            return Ok(DependencyStatus::Dirty(DriftReason::UnreadableState(
                error.to_string(),
            )));
        }
        Err(err) => return Err(err),
    };

    if !state.verify {
        return Ok(DependencyStatus::VerifySkipped);
    }

    if state.version != dep.spec.version {
        return Ok(DependencyStatus::Dirty(DriftReason::VersionChanged {
            expected: dep.spec.version.clone(),
            recorded: state.version,
        }));
    }

    let payload = dep.payload_dir();
    if !payload.is_dir() {
        return Ok(DependencyStatus::Dirty(DriftReason::PayloadMissing));
    }

    if fingerprint_dir(&payload)? != state.fingerprint {
        return Ok(DependencyStatus::Dirty(DriftReason::ContentsChanged));
    }

    Ok(DependencyStatus::Clean)
}

/// Per-dependency reader/writer locks keyed by contents directory.
///
/// Updates hold the write half, verifications the read half. Entries are
/// created on first use; long-lived sessions call [`DependencyLocks::prune`]
/// to drop the ones nobody holds.
#[derive(Debug, Clone, Default)]
pub struct DependencyLocks {
    locks: Arc<DashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl DependencyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked contents directories.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Forget locks that no update or verification currently holds.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn lock_for(&self, dep: &Dependency) -> Arc<RwLock<()>> {
        self.locks.entry(dep.contents_dir()).or_default().clone()
    }
}

/// Check a dependency while holding its read lock.
pub async fn verify_dependency(dep: &Dependency, locks: &DependencyLocks) -> Result<DependencyStatus> {
    let lock = locks.lock_for(dep);
    let _guard = lock.read().await;

    let owned = dep.clone();
    let status = tokio::task::spawn_blocking(move || check_dependency(&owned))
        .await
        .map_err(std::io::Error::from)??;

    if status.passed() {
        tracing::debug!(dependency = dep.label(), %status, "dependency verified");
    } else {
        tracing::warn!(dependency = dep.label(), %status, "dependency failed verification");
    }
    Ok(status)
}

/// Result of a successful update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new payload was materialized and recorded.
    Updated(DependencyState),
    /// The recorded state already matches the descriptor.
    UpToDate(DependencyStatus),
}

/// Materialize a dependency and record its state.
///
/// The payload is fetched into a staging directory and swapped into place
/// before the state record is replaced. Any failure, or dropping the future,
/// leaves the previous record untouched.
pub async fn update_dependency(
    dep: &Dependency,
    fetcher: &dyn Fetcher,
    locks: &DependencyLocks,
    force: bool,
) -> Result<UpdateOutcome> {
    let lock = locks.lock_for(dep);
    let _guard = lock.write().await;

    if !force {
        if let Some(status) = current_status(dep)? {
            tracing::debug!(dependency = dep.label(), %status, "dependency already up to date");
            return Ok(UpdateOutcome::UpToDate(status));
        }
    }

    tracing::info!(
        dependency = dep.label(),
        version = %dep.spec.version,
        source = %dep.spec.source,
        "materializing dependency"
    );

    let contents = dep.contents_dir();
    std::fs::create_dir_all(&contents)?;
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&contents)?;
    let staged_payload = staging.path().join(dep.name());

    fetcher.fetch(&dep.spec, &staged_payload).await?;
    if !staged_payload.is_dir() {
        return Err(Error::FetchFailed {
            name: dep.name().to_string(),
            message: format!("fetcher produced no payload at {}", staged_payload.display()),
        });
    }

    let fingerprint_target = staged_payload.clone();
    let fingerprint = tokio::task::spawn_blocking(move || fingerprint_dir(&fingerprint_target))
        .await
        .map_err(std::io::Error::from)??;

    let state = DependencyState {
        api: StateApiVersion::V0,
        identifier: dep.identifier.clone(),
        name: dep.name().to_string(),
        version: dep.spec.version.clone(),
        verify: dep.spec.verify,
        fingerprint,
        updated: Some(UpdateMetadata::now()),
    };

    // No await points from here on: the swap and the state write commit together.
    let retired = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&contents)?;
    commit_payload(dep, &staged_payload, &retired.path().join(dep.name()), &state)?;
    drop(retired);
    drop(staging);

    tracing::info!(
        dependency = dep.label(),
        version = %state.version,
        "dependency materialized"
    );
    Ok(UpdateOutcome::Updated(state))
}

/// Swap the staged payload into place and record `state`.
///
/// On failure the previous payload is moved back before returning.
fn commit_payload(
    dep: &Dependency,
    staged: &Path,
    retired: &Path,
    state: &DependencyState,
) -> Result<()> {
    let payload = dep.payload_dir();
    let had_previous = payload.exists();
    if had_previous {
        std::fs::rename(&payload, retired)?;
    }

    let committed = std::fs::rename(staged, &payload)
        .map_err(Error::from)
        .and_then(|_| state.save(dep.state_path()));
    if let Err(err) = committed {
        if payload.exists() {
            let _ = std::fs::remove_dir_all(&payload);
        }
        if had_previous {
            if let Err(restore) = std::fs::rename(retired, &payload) {
                tracing::error!(
                    dependency = dep.label(),
                    "failed to restore previous payload: {restore}"
                );
            }
        }
        return Err(err);
    }
    Ok(())
}

/// `Some(status)` when the recorded state already satisfies the descriptor.
fn current_status(dep: &Dependency) -> Result<Option<DependencyStatus>> {
    match check_dependency(dep)? {
        DependencyStatus::Clean => Ok(Some(DependencyStatus::Clean)),
        DependencyStatus::VerifySkipped => {
            // Operators opt out of checks to keep local edits; only a
            // version change replaces the payload.
            let recorded = dep.load_state()?.map(|s| s.version);
            if recorded.as_deref() == Some(dep.spec.version.as_str()) {
                Ok(Some(DependencyStatus::VerifySkipped))
            } else {
                Ok(None)
            }
        }
        DependencyStatus::Unmaterialized | DependencyStatus::Dirty(_) => Ok(None),
    }
}

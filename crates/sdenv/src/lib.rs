// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! sdenv - Self-Describing Workspace Environments
//!
//! This crate assembles a build environment from descriptor files scattered
//! across a source workspace, and keeps track of external dependencies
//! materialized inside it.
//!
//! # Overview
//!
//! Descriptors come in two kinds, recognized by file name:
//!
//! - `*_path_env.yaml` publishes a directory into the environment.
//! - `*_ext_dep.yaml` declares an external dependency fetched by a
//!   version-control or package tool.
//!
//! A bootstrap walks the workspace, keeps the descriptors whose scope was
//! requested, applies overrides by identifier and aggregates the result into
//! search paths and variables. Dependencies are updated into
//! `<name>_extdep/` next to their descriptor and later verified against the
//! recorded state.
//!
//! # Example
//!
//! ```yaml
//! # tools/nasm_path_env.yaml
//! id: nasm-bin
//! scope: global
//! var_name: NASM_PREFIX
//! path: bin
//! flags:
//!   - set_path
//!   - set_shell_var
//! ```
//!
//! ```yaml
//! # deps/hello_ext_dep.yaml
//! id: hello-world
//! type: git
//! name: HelloWorld
//! version: 7fd1a60b01f91b314f59955a4e4d4e80d8edf11d
//! source: https://github.com/octocat/Hello-World.git
//! ```

pub mod dependency;
pub mod descriptor;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod scope;
pub mod session;
pub mod shell;
pub mod state;
pub mod version;

pub use dependency::{Dependency, DependencyStatus, DriftReason, UpdateOutcome};
pub use descriptor::{DepType, Descriptor, DescriptorKind, EnvFlag, ExtDep, PathEnv};
pub use discovery::{DiscoveryOptions, discover_descriptors};
pub use environment::{BuildEnvironment, ShellEnvironment, aggregate};
pub use error::{Error, Result};
pub use fetch::{Fetcher, FetcherRegistry, GitFetcher, NugetFetcher};
pub use merge::{AppliedOverride, ResolvedDescriptors, merge_descriptors};
pub use scope::{ScopeSet, filter_by_scope};
pub use session::{
    Environment, UpdateOptions, UpdateReport, UpdateSummary, VerifyReport, VerifySummary,
    bootstrap_environment, update_dependencies, verify_environment,
};
pub use shell::ActiveEnvironment;
pub use state::{DependencyState, fingerprint_dir};
pub use version::{VersionAggregator, VersionEntry, VersionKind};

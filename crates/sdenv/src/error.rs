// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for sdenv operations.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::descriptor::{DepType, EnvFlag};

/// Convenience Result type with sdenv Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during sdenv operations.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Workspace root does not exist or is not a directory
    #[error("Workspace not found: {0:?}")]
    #[diagnostic(
        code(sdenv::workspace_not_found),
        help("Pass an existing directory with --workspace")
    )]
    WorkspaceNotFound(PathBuf),

    /// The same scope was requested more than once
    #[error("Scope '{scope}' was requested more than once")]
    #[diagnostic(
        code(sdenv::duplicate_scope),
        help("Scopes are compared case-insensitively; remove the repeated entry")
    )]
    DuplicateScope { scope: String },

    /// A descriptor file could not be parsed
    #[error("Invalid descriptor {path:?}: {error}")]
    #[diagnostic(
        code(sdenv::invalid_descriptor),
        help("Check YAML syntax and the required fields for this descriptor kind")
    )]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        error: serde_yaml::Error,
    },

    /// Failed to read file
    #[error("Failed to read file: {path:?}")]
    #[diagnostic(code(sdenv::read_failed))]
    ReadFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Failed to walk the workspace tree
    #[error("Failed to walk workspace under {path:?}")]
    #[diagnostic(code(sdenv::walk_failed))]
    WalkFailed {
        path: PathBuf,
        #[source]
        error: walkdir::Error,
    },

    /// Two active descriptors share an identifier
    #[error("Duplicate descriptor id '{identifier}' in {}", display_paths(.sources))]
    #[diagnostic(
        code(sdenv::duplicate_identifier),
        help("Give each descriptor a unique id, or use override_id to replace one")
    )]
    DuplicateIdentifier {
        identifier: String,
        sources: Vec<PathBuf>,
    },

    /// Two active descriptors override the same identifier
    #[error("Multiple descriptors override '{override_id}': {}", display_paths(.sources))]
    #[diagnostic(
        code(sdenv::duplicate_override),
        help("Only one active descriptor may override a given id")
    )]
    DuplicateOverride {
        override_id: String,
        sources: Vec<PathBuf>,
    },

    /// Overrides form a loop and no descriptor anchors the chain
    #[error("Override cycle between descriptors: {}", .identifiers.join(" -> "))]
    #[diagnostic(code(sdenv::override_cycle))]
    OverrideCycle { identifiers: Vec<String> },

    /// A variable flag was set without a variable name
    #[error("Descriptor {path:?} sets {flag} but has no var_name")]
    #[diagnostic(
        code(sdenv::missing_var_name),
        help("Add a var_name field or remove the {flag} flag")
    )]
    MissingVarName { flag: EnvFlag, path: PathBuf },

    /// A dependency state file exists but cannot be parsed
    #[error("Invalid dependency state file {path:?}: {error}")]
    #[diagnostic(
        code(sdenv::invalid_state),
        help("Fix the file by hand or delete it and run 'sdenv update'")
    )]
    InvalidState {
        path: PathBuf,
        #[source]
        error: serde_yaml::Error,
    },

    /// No fetcher is registered for a dependency type
    #[error("No fetcher registered for dependency type '{0}'")]
    #[diagnostic(code(sdenv::no_fetcher))]
    NoFetcher(DepType),

    /// The delegated fetch mechanism failed
    #[error("Failed to fetch dependency '{name}': {message}")]
    #[diagnostic(code(sdenv::fetch_failed))]
    FetchFailed { name: String, message: String },

    /// Two different versions were reported under the same name
    #[error("Version conflict for '{name}': {existing} already reported, got {reported}")]
    #[diagnostic(
        code(sdenv::version_conflict),
        help("Two descriptors declare '{name}' at different versions")
    )]
    VersionConflict {
        name: String,
        existing: String,
        reported: String,
    },

    /// Restoring a checkpoint that was never taken
    #[error("Checkpoint {0} does not exist")]
    #[diagnostic(code(sdenv::unknown_checkpoint))]
    UnknownCheckpoint(usize),

    /// Validation error
    #[error("Validation failed: {0}")]
    #[diagnostic(code(sdenv::validation_failed))]
    ValidationFailed(String),

    /// IO error passthrough
    #[error(transparent)]
    #[diagnostic(code(sdenv::io_error))]
    Io(#[from] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! A mutable copy of an OS environment with checkpoints.
//!
//! [`ActiveEnvironment`] starts from a snapshot of some environment (usually
//! the current process's), receives a resolved workspace environment via
//! [`ActiveEnvironment::apply`], and is then rendered as a POSIX startup
//! script or handed to a child process. The process's own environment is
//! never modified.

use std::collections::BTreeMap;

use crate::environment::{BuildEnvironment, ShellEnvironment};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./shell_test.rs"]
mod shell_test;

/// Index of the checkpoint taken on construction.
pub const INITIAL_CHECKPOINT: usize = 0;

/// Separator between entries of `PATH`-like variables.
#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

const PATH_VAR: &str = "PATH";
const PYPATH_VAR: &str = "PYTHONPATH";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Snapshot {
    vars: BTreeMap<String, String>,
    path: Vec<String>,
    pypath: Vec<String>,
    build_vars: BTreeMap<String, Option<String>>,
}

/// Working copy of an environment.
///
/// `PATH` and `PYTHONPATH` are held as element lists; every other variable is
/// a plain string. Build variables live alongside and are never exported.
#[derive(Debug, Clone)]
pub struct ActiveEnvironment {
    current: Snapshot,
    checkpoints: Vec<Snapshot>,
}

impl ActiveEnvironment {
    /// Snapshot the current process environment.
    pub fn from_os() -> Self {
        Self::from_vars(std::env::vars_os().map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        }))
    }

    /// An environment with no variables at all.
    pub fn empty() -> Self {
        Self::from_vars(std::iter::empty::<(String, String)>())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut snapshot = Snapshot::default();
        for (name, value) in vars {
            let name = name.into();
            let value = value.into();
            if name.eq_ignore_ascii_case(PATH_VAR) {
                snapshot.path = split_path(&value);
            } else if name.eq_ignore_ascii_case(PYPATH_VAR) {
                snapshot.pypath = split_path(&value);
            } else {
                snapshot.vars.insert(name, value);
            }
        }

        Self {
            checkpoints: vec![snapshot.clone()],
            current: snapshot,
        }
    }

    pub fn path(&self) -> &[String] {
        &self.current.path
    }

    pub fn pypath(&self) -> &[String] {
        &self.current.pypath
    }

    /// Replace the whole executable search path.
    pub fn set_path<I, S>(&mut self, elements: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tracing::debug!("overriding PATH");
        self.current.path = elements.into_iter().map(Into::into).collect();
    }

    /// Replace the whole interpreter search path.
    pub fn set_pypath<I, S>(&mut self, elements: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tracing::debug!("overriding PYTHONPATH");
        self.current.pypath = elements.into_iter().map(Into::into).collect();
    }

    /// Add an element at the end of `PATH`, moving it if already present.
    pub fn append_path(&mut self, element: impl Into<String>) {
        let element = element.into();
        tracing::debug!(%element, "appending PATH element");
        append_element(&mut self.current.path, element);
    }

    /// Add an element at the front of `PATH`, moving it if already present.
    pub fn insert_path(&mut self, element: impl Into<String>) {
        let element = element.into();
        tracing::debug!(%element, "inserting PATH element");
        insert_element(&mut self.current.path, element);
    }

    pub fn append_pypath(&mut self, element: impl Into<String>) {
        let element = element.into();
        tracing::debug!(%element, "appending PYTHONPATH element");
        append_element(&mut self.current.pypath, element);
    }

    pub fn insert_pypath(&mut self, element: impl Into<String>) {
        let element = element.into();
        tracing::debug!(%element, "inserting PYTHONPATH element");
        insert_element(&mut self.current.pypath, element);
    }

    pub fn remove_path_element(&mut self, element: &str) {
        tracing::debug!(element, "removing PATH element");
        self.current.path.retain(|e| e != element);
    }

    pub fn remove_pypath_element(&mut self, element: &str) {
        tracing::debug!(element, "removing PYTHONPATH element");
        self.current.pypath.retain(|e| e != element);
    }

    /// Swap every occurrence of `old` in `PATH` for `new`, in place.
    pub fn replace_path_element(&mut self, old: &str, new: &str) {
        tracing::debug!(old, new, "replacing PATH element");
        replace_element(&mut self.current.path, old, new);
    }

    pub fn replace_pypath_element(&mut self, old: &str, new: &str) {
        tracing::debug!(old, new, "replacing PYTHONPATH element");
        replace_element(&mut self.current.pypath, old, new);
    }

    /// Set an exported variable.
    ///
    /// `PATH` and `PYTHONPATH` (in any casing) replace the corresponding
    /// element list, splitting the value on [`PATH_SEPARATOR`].
    pub fn set_shell_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case(PATH_VAR) {
            self.set_path(split_path(&value));
        } else if name.eq_ignore_ascii_case(PYPATH_VAR) {
            self.set_pypath(split_path(&value));
        } else {
            tracing::debug!(%name, %value, "setting shell variable");
            self.current.vars.insert(name, value);
        }
    }

    pub fn get_shell_var(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case(PATH_VAR) {
            Some(join_path(&self.current.path))
        } else if name.eq_ignore_ascii_case(PYPATH_VAR) {
            Some(join_path(&self.current.pypath))
        } else {
            self.current.vars.get(name).cloned()
        }
    }

    /// Set a build-only variable. `None` defines it without a value.
    pub fn set_build_var(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        tracing::debug!(%name, ?value, "setting build variable");
        self.current.build_vars.insert(name, value);
    }

    /// `Some(None)` for a variable that is defined without a value.
    pub fn get_build_var(&self, name: &str) -> Option<Option<&str>> {
        self.current.build_vars.get(name).map(Option::as_deref)
    }

    /// Record the current state and return its index.
    pub fn checkpoint(&mut self) -> usize {
        self.checkpoints.push(self.current.clone());
        self.checkpoints.len() - 1
    }

    pub fn restore_checkpoint(&mut self, index: usize) -> Result<()> {
        let snapshot = self
            .checkpoints
            .get(index)
            .ok_or(Error::UnknownCheckpoint(index))?;
        self.current = snapshot.clone();
        Ok(())
    }

    pub fn restore_initial_checkpoint(&mut self) {
        if let Some(initial) = self.checkpoints.first() {
            self.current = initial.clone();
        }
    }

    /// Layer a resolved workspace environment on top of this one.
    ///
    /// Resolved path entries end up ahead of inherited ones, in resolved order.
    pub fn apply(&mut self, build: &BuildEnvironment, shell: &ShellEnvironment) {
        for path in build.paths.iter().rev() {
            self.insert_path(path.display().to_string());
        }
        for path in build.pypaths.iter().rev() {
            self.insert_pypath(path.display().to_string());
        }
        for (name, value) in &build.build_vars {
            self.set_build_var(name.clone(), Some(value.clone()));
        }
        for (name, value) in &shell.vars {
            self.set_shell_var(name.clone(), value.clone());
        }
    }

    /// Every variable a child process should see.
    pub fn exported_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.current.vars.clone();
        if !self.current.path.is_empty() {
            vars.insert(PATH_VAR.to_string(), join_path(&self.current.path));
        }
        if !self.current.pypath.is_empty() {
            vars.insert(PYPATH_VAR.to_string(), join_path(&self.current.pypath));
        }
        vars
    }

    /// POSIX shell script reproducing the changes since the initial checkpoint.
    pub fn startup_script(&self) -> String {
        let initial = Self {
            current: self.checkpoints.first().cloned().unwrap_or_default(),
            checkpoints: Vec::new(),
        }
        .exported_vars();
        let exported = self.exported_vars();

        let mut script = String::from("# sdenv startup script\n");
        for (name, value) in &exported {
            if initial.get(name) != Some(value) {
                script.push_str(&format!("export {name}=\"{}\"\n", escape_value(value)));
            }
        }
        for name in initial.keys() {
            if !exported.contains_key(name) {
                script.push_str(&format!("unset {name}\n"));
            }
        }
        script
    }
}

impl Default for ActiveEnvironment {
    fn default() -> Self {
        Self::empty()
    }
}

fn split_path(value: &str) -> Vec<String> {
    value
        .split(PATH_SEPARATOR)
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect()
}

fn join_path(elements: &[String]) -> String {
    elements.join(&PATH_SEPARATOR.to_string())
}

fn append_element(list: &mut Vec<String>, element: String) {
    list.retain(|e| *e != element);
    list.push(element);
}

fn insert_element(list: &mut Vec<String>, element: String) {
    list.retain(|e| *e != element);
    list.insert(0, element);
}

fn replace_element(list: &mut [String], old: &str, new: &str) {
    for entry in list.iter_mut().filter(|e| e.as_str() == old) {
        *entry = new.to_string();
    }
}

/// Escape a value for use inside double quotes.
fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

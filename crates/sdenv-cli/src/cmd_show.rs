// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `sdenv show` command.

use std::path::Path;

use clap::{Args, ValueEnum};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

#[cfg(test)]
#[path = "./cmd_show_test.rs"]
mod cmd_show_test;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Table,
    Yaml,
    Json,
}

/// Display resolved descriptors and environment
#[derive(Debug, Args)]
pub struct CmdShow {
    #[clap(flatten)]
    workspace: crate::WorkspaceFlags,

    /// Show resolved descriptors
    #[clap(long)]
    descriptors: bool,

    /// Show environment buckets
    #[clap(long)]
    buckets: bool,

    /// Output format
    #[clap(long, value_enum, default_value_t = Format::Table)]
    format: Format,
}

/// Everything `show` knows, in serializable form.
#[derive(Serialize)]
struct ShowOutput<'a> {
    workspace: &'a Path,
    scopes: Vec<&'a str>,
    descriptors: Vec<&'a sdenv::Descriptor>,
    overrides: &'a [sdenv::AppliedOverride],
    build: &'a sdenv::BuildEnvironment,
    shell: &'a sdenv::ShellEnvironment,
}

impl CmdShow {
    pub async fn run(&mut self) -> Result<i32> {
        let env = self.workspace.open()?;
        let resolved = env.resolve()?;
        let (build, shell) = sdenv::aggregate(&resolved)?;

        let output = ShowOutput {
            workspace: env.root(),
            scopes: env.scopes().iter().collect(),
            descriptors: resolved.iter().collect(),
            overrides: &resolved.overrides,
            build: &build,
            shell: &shell,
        };

        match self.format {
            Format::Yaml => {
                let yaml = serde_yaml::to_string(&output).into_diagnostic()?;
                print!("{yaml}");
            }
            Format::Json => {
                let json = serde_json::to_string_pretty(&output).into_diagnostic()?;
                println!("{json}");
            }
            Format::Table => {
                let show_all = !self.descriptors && !self.buckets;
                if self.descriptors || show_all {
                    self.show_descriptors_table(&output);
                }
                if show_all {
                    println!();
                }
                if self.buckets || show_all {
                    self.show_buckets_table(&output);
                }
            }
        }

        Ok(0)
    }

    fn show_descriptors_table(&self, output: &ShowOutput<'_>) {
        println!(
            "{} {} [{}]",
            "Resolved Descriptors:".bold(),
            output.workspace.display(),
            output.scopes.join(", ").yellow()
        );
        println!();

        for (i, descriptor) in output.descriptors.iter().enumerate() {
            let id = descriptor
                .identifier
                .as_deref()
                .map(|id| format!(" ({id})"))
                .unwrap_or_default();
            let rel = descriptor
                .source_path
                .strip_prefix(output.workspace)
                .unwrap_or(&descriptor.source_path);

            println!(
                "  {}. {}{} {}",
                i + 1,
                rel.display().to_string().cyan(),
                id.green(),
                format!("[{}]", descriptor.kind_name()).blue()
            );

            if let Some(ext_dep) = descriptor.as_ext_dep() {
                println!(
                    "     {} {} @ {}",
                    ext_dep.dep_type,
                    ext_dep.name,
                    ext_dep.version.dimmed()
                );
            }
            let flags: Vec<&str> = descriptor.flags().iter().map(|f| f.as_str()).collect();
            if !flags.is_empty() {
                println!("     flags: {}", flags.join(", ").dimmed());
            }
        }

        println!();
        println!("Total: {} descriptor(s)", output.descriptors.len());

        if !output.overrides.is_empty() {
            println!();
            println!("{}", "Applied Overrides:".bold());
            println!();
            for applied in output.overrides {
                println!(
                    "  {}: {} -> {}",
                    applied.identifier.green(),
                    applied.replaced.display().to_string().dimmed(),
                    applied.replacement.display().to_string().cyan()
                );
            }
        }
    }

    fn show_buckets_table(&self, output: &ShowOutput<'_>) {
        let print_list = |title: &str, entries: &[std::path::PathBuf]| {
            println!("{}", title.bold());
            println!();
            if entries.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for (i, entry) in entries.iter().enumerate() {
                println!("  {}. {}", i + 1, entry.display().to_string().green());
            }
            println!();
        };
        print_list("Search Paths:", &output.build.paths);
        print_list("Interpreter Paths:", &output.build.pypaths);

        let print_vars = |title: &str, vars: &std::collections::BTreeMap<String, String>| {
            println!("{}", title.bold());
            println!();
            if vars.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for (name, value) in vars {
                println!("  {} = {}", name.cyan(), value.green());
            }
        };
        print_vars("Build Variables:", &output.build.build_vars);
        println!();
        print_vars("Shell Variables:", &output.shell.vars);
    }
}

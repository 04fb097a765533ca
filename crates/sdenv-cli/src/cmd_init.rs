// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `sdenv init` command.

use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use miette::Result;
use sdenv::descriptor::{DEFAULT_SCOPE, DescriptorFileKind};

#[cfg(test)]
#[path = "./cmd_init_test.rs"]
mod cmd_init_test;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    PathEnv,
    ExtDep,
}

impl From<Kind> for DescriptorFileKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::PathEnv => DescriptorFileKind::PathEnv,
            Kind::ExtDep => DescriptorFileKind::ExtDep,
        }
    }
}

/// Create a new descriptor file
#[derive(Debug, Args)]
pub struct CmdInit {
    /// Directory to create the descriptor in
    #[clap(default_value = ".")]
    path: PathBuf,

    /// Kind of descriptor to create
    #[clap(long, value_enum, default_value_t = Kind::PathEnv)]
    kind: Kind,

    /// Descriptor file prefix, and dependency name for ext-dep descriptors
    #[clap(long)]
    name: String,

    /// Identifier other descriptors can override
    #[clap(long)]
    id: Option<String>,

    /// Scope under which the descriptor is active
    #[clap(long, default_value = DEFAULT_SCOPE)]
    scope: String,

    /// Environment flag (set_path, set_pypath, set_build_var, set_shell_var)
    #[clap(long = "flag")]
    flags: Vec<String>,

    /// Variable name for set_build_var / set_shell_var
    #[clap(long)]
    var_name: Option<String>,

    /// Dependency type for ext-dep descriptors: git, nuget
    #[clap(long = "type", default_value = "git")]
    dep_type: String,

    /// Clone URL or package feed for ext-dep descriptors
    #[clap(long)]
    source: Option<String>,

    /// Version, tag or commit for ext-dep descriptors
    #[clap(long)]
    version: Option<String>,
}

impl CmdInit {
    pub async fn run(&mut self) -> Result<i32> {
        let file_kind = DescriptorFileKind::from(self.kind);
        let descriptor_path = self.descriptor_path(&self.path, file_kind);

        if descriptor_path.exists() {
            return Err(miette::miette!(
                "Descriptor already exists at {:?}",
                descriptor_path
            ));
        }

        let content = match self.kind {
            Kind::PathEnv => self.generate_path_env_template(),
            Kind::ExtDep => self.generate_ext_dep_template(),
        };

        // Refuse to write something discovery would reject later.
        sdenv::Descriptor::from_yaml(file_kind, &content, &descriptor_path)?;

        std::fs::create_dir_all(&self.path)
            .map_err(|e| miette::miette!("Failed to create {:?}: {}", self.path, e))?;
        std::fs::write(&descriptor_path, content)
            .map_err(|e| miette::miette!("Failed to write descriptor: {}", e))?;

        println!("Created descriptor at {:?}", descriptor_path);
        println!();
        println!("Next steps:");
        println!("  1. Edit the file to adjust flags and paths");
        println!("  2. Run 'sdenv show' to preview the environment");
        if self.kind == Kind::ExtDep {
            println!("  3. Run 'sdenv update' to fetch the dependency");
        }

        Ok(0)
    }

    fn descriptor_path(&self, dir: &Path, kind: DescriptorFileKind) -> PathBuf {
        dir.join(format!("{}{}.yaml", self.name, kind.suffix()))
    }

    fn header(&self) -> String {
        let id = match &self.id {
            Some(id) => format!("id: {id}\n"),
            None => "# id: my-identifier\n".to_string(),
        };
        format!(
            "{id}\
            scope: {}\n\
            # override_id: identifier-to-replace\n",
            self.scope
        )
    }

    fn flags_section(&self) -> String {
        let var_name = match &self.var_name {
            Some(name) => format!("var_name: {name}\n"),
            None => "# var_name: MY_VAR\n".to_string(),
        };
        let flags = if self.flags.is_empty() {
            "flags: []\n".to_string()
        } else {
            format!(
                "flags:\n{}\n",
                self.flags
                    .iter()
                    .map(|f| format!("  - {}", f))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };
        format!("{var_name}{flags}")
    }

    fn generate_path_env_template(&self) -> String {
        format!(
            "# sdenv path environment descriptor\n\
            {}\
            \n\
            # Directory to publish, relative to this file (default: .)\n\
            # path: bin\n\
            \n\
            # Buckets: set_path, set_pypath, set_build_var, set_shell_var\n\
            {}",
            self.header(),
            self.flags_section(),
        )
    }

    fn generate_ext_dep_template(&self) -> String {
        let source = self
            .source
            .clone()
            .unwrap_or_else(|| "https://example.com/replace-me.git".to_string());
        let version = self.version.clone().unwrap_or_else(|| "main".to_string());
        format!(
            "# sdenv external dependency descriptor\n\
            {}\
            \n\
            type: {}\n\
            name: {}\n\
            version: {:?}\n\
            source: {:?}\n\
            \n\
            # Drift checking; also switchable in {}_extdep/extdep_state.yaml\n\
            verify: true\n\
            \n\
            # Optionally publish the fetched payload directory\n\
            {}",
            self.header(),
            self.dep_type,
            self.name,
            version,
            source,
            self.name,
            self.flags_section(),
        )
    }
}

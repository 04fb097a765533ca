// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `sdenv shell` command.

use clap::Args;
use miette::{IntoDiagnostic, Result};

/// Enter an interactive shell in the resolved environment
#[derive(Debug, Args)]
pub struct CmdShell {
    #[clap(flatten)]
    workspace: crate::WorkspaceFlags,

    /// Shell to use
    #[clap(long)]
    shell: Option<String>,
}

impl CmdShell {
    pub async fn run(&mut self) -> Result<i32> {
        let shell = self
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/bash".to_string());

        let env = self.workspace.open()?;
        let (build, shell_env) = env.bootstrap()?;

        let mut active = sdenv::ActiveEnvironment::from_os();
        active.apply(&build, &shell_env);

        tracing::info!(%shell, root = %env.root().display(), "entering workspace shell");
        let status = tokio::process::Command::new(&shell)
            .env_clear()
            .envs(active.exported_vars())
            .env("SDENV_ACTIVE", env.root())
            .status()
            .await
            .into_diagnostic()?;

        Ok(status.code().unwrap_or(1))
    }
}

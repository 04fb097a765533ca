// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `sdenv env` command.

use clap::Args;
use miette::Result;

/// Print a startup script for the resolved environment
///
/// Use as `eval "$(sdenv env)"` to apply the environment to the current shell.
#[derive(Debug, Args)]
pub struct CmdEnv {
    #[clap(flatten)]
    workspace: crate::WorkspaceFlags,

    /// Start from an empty environment instead of the current one
    #[clap(long)]
    clean: bool,
}

impl CmdEnv {
    pub async fn run(&mut self) -> Result<i32> {
        let env = self.workspace.open()?;
        let (build, shell) = env.bootstrap()?;

        let mut active = if self.clean {
            sdenv::ActiveEnvironment::empty()
        } else {
            sdenv::ActiveEnvironment::from_os()
        };
        active.apply(&build, &shell);

        print!("{}", active.startup_script());
        Ok(0)
    }
}

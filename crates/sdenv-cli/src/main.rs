// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! sdenv - Self-Describing Workspace Environment CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;

mod cmd_env;
mod cmd_init;
mod cmd_shell;
mod cmd_show;
mod cmd_update;
mod cmd_verify;

use cmd_env::CmdEnv;
use cmd_init::CmdInit;
use cmd_shell::CmdShell;
use cmd_show::CmdShow;
use cmd_update::CmdUpdate;
use cmd_verify::CmdVerify;

#[derive(Parser)]
#[clap(
    name = "sdenv",
    about = "Self-Describing Workspace Environments",
    version,
    long_about = "Assemble build environments from descriptor files found across a workspace"
)]
struct Opt {
    #[clap(flatten)]
    logging: Logging,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
struct Logging {
    /// Increase verbosity (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[clap(short, long, global = true)]
    quiet: bool,
}

/// Workspace and scope selection shared by most commands.
#[derive(Parser, Clone, Debug)]
pub struct WorkspaceFlags {
    /// Workspace root to search for descriptors
    #[clap(short = 'w', long, env = "SDENV_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Active scope, in priority order (repeatable)
    #[clap(
        short = 's',
        long = "scope",
        env = "SDENV_SCOPES",
        value_delimiter = ',',
        default_value = "global"
    )]
    pub scopes: Vec<String>,
}

impl WorkspaceFlags {
    /// Open a session for the selected workspace and scopes.
    pub fn open(&self) -> sdenv::Result<sdenv::Environment> {
        sdenv::Environment::new(&self.workspace, self.scopes.iter().cloned())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a new descriptor file
    Init(CmdInit),

    /// Display resolved descriptors and environment
    Show(CmdShow),

    /// Print a startup script for the resolved environment
    Env(CmdEnv),

    /// Enter an interactive shell in the resolved environment
    Shell(CmdShell),

    /// Fetch or refresh external dependencies
    Update(CmdUpdate),

    /// Check external dependencies for drift
    Verify(CmdVerify),
}

impl Opt {
    async fn run(self) -> Result<i32> {
        let log_level = match (self.logging.quiet, self.logging.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::INFO,
            (false, 2) => tracing::Level::DEBUG,
            (false, _) => tracing::Level::TRACE,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .init();

        match self.cmd {
            Command::Init(mut cmd) => cmd.run().await,
            Command::Show(mut cmd) => cmd.run().await,
            Command::Env(mut cmd) => cmd.run().await,
            Command::Shell(mut cmd) => cmd.run().await,
            Command::Update(mut cmd) => cmd.run().await,
            Command::Verify(mut cmd) => cmd.run().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let code = opt.run().await?;
    std::process::exit(code);
}

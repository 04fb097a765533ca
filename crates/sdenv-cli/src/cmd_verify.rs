// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Check that materialized dependencies still match their recorded state.

use clap::Args;
use miette::Result;

/// Check external dependencies for drift
#[derive(Debug, Args)]
pub struct CmdVerify {
    #[clap(flatten)]
    workspace: crate::WorkspaceFlags,

    /// Exit with error on drift
    #[clap(long)]
    strict: bool,
}

impl CmdVerify {
    pub async fn run(&mut self) -> Result<i32> {
        let env = self.workspace.open()?;
        let summary = env.verify().await?;

        if summary.passed() {
            println!("✓ All {} dependencies verified", summary.reports.len());
            return Ok(0);
        }

        if self.strict {
            eprintln!("Error: Dependencies differ from their recorded state:");
        } else {
            println!("Warning: Dependencies differ from their recorded state:");
        }

        for report in summary.failing() {
            println!(
                "  - {} ({}): {}",
                report.dependency.label(),
                report.dependency.source_path.display(),
                report.status
            );
        }

        if self.strict {
            return Ok(1);
        }

        println!("\nRun 'sdenv update' to refresh them");
        Ok(0)
    }
}

// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `sdenv update` command.

use clap::Args;
use colored::Colorize;
use miette::Result;
use sdenv::UpdateOutcome;

/// Fetch or refresh external dependencies
#[derive(Debug, Args)]
pub struct CmdUpdate {
    #[clap(flatten)]
    workspace: crate::WorkspaceFlags,

    /// Re-fetch dependencies that are already up to date
    #[clap(short, long)]
    force: bool,

    /// Maximum number of dependencies updated at once
    #[clap(short, long, env = "SDENV_JOBS", default_value_t = sdenv::session::DEFAULT_MAX_WORKERS)]
    jobs: usize,
}

impl CmdUpdate {
    pub async fn run(&mut self) -> Result<i32> {
        let env = self.workspace.open()?;
        let options = sdenv::UpdateOptions {
            force: self.force,
            max_workers: self.jobs,
        };

        let summary = env.update_dependencies(&options).await?;
        if summary.reports.is_empty() {
            println!("No external dependencies in scope");
            return Ok(0);
        }

        for report in &summary.reports {
            let dep = &report.dependency;
            let label = format!("{} @ {}", dep.label(), dep.spec.version);
            match &report.result {
                Ok(UpdateOutcome::Updated(_)) => {
                    println!("  {} {}", "updated".green(), label.cyan());
                }
                Ok(UpdateOutcome::UpToDate(status)) => {
                    println!("  {} {} ({status})", "current".dimmed(), label.cyan());
                }
                Err(err) => {
                    println!("  {} {}: {err}", "failed".red(), label.cyan());
                }
            }
        }

        let failed = summary.failures().count();
        println!();
        println!(
            "Updated {}, failed {} of {} dependencies",
            summary.updated(),
            failed,
            summary.reports.len()
        );

        if failed > 0 {
            return Ok(1);
        }
        Ok(0)
    }
}

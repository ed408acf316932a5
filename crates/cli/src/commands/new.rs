// `storyverse new` — start an empty local project.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::output::{self, OutputFormat};

use super::status::{format_human, ProjectSummary};

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Project name.
    pub name: String,

    /// Project file to create. Without it the project lives in the
    /// local backup store only.
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: NewArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let name = args.name.trim();
    anyhow::ensure!(!name.is_empty(), "project name must not be empty");

    let mut runtime = super::open_runtime()?;
    runtime
        .reconciler
        .new_local_project(name, args.file.as_deref())
        .await
        .with_context(|| format!("failed to create project `{name}`"))?;

    let summary = ProjectSummary::capture(&runtime.reconciler);
    runtime.engine().shutdown();
    output::print_output(format, &summary, format_human)?;
    Ok(())
}

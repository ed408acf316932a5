// `storyverse resolve` — settle a local/drive conflict.

use anyhow::Context;
use clap::{Args, ValueEnum};

use crate::output::{self, OutputFormat};

use super::status::{format_human, ProjectSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resolution {
    /// Upload the local copy over the drive copy
    KeepLocal,
    /// Keep the drive copy and forget the local one
    KeepRemote,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    #[arg(value_enum)]
    resolution: Resolution,

    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ResolveArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let mut runtime = super::launch().await?;
    match args.resolution {
        Resolution::KeepLocal => runtime.reconciler.resolve_overwrite_remote().await,
        Resolution::KeepRemote => runtime.reconciler.resolve_discard_local().await,
    }
    .context("conflict resolution failed")?;

    let summary = ProjectSummary::capture(&runtime.reconciler);
    runtime.engine().shutdown();
    output::print_output(format, &summary, format_human)?;
    Ok(())
}

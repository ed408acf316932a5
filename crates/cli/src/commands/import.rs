// `storyverse import` — sanitize an arbitrary JSON file into the live project.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::output::{self, OutputFormat};

use super::status::{format_human, ProjectSummary};

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// JSON file to import.
    pub source: PathBuf,

    /// Local project file to write the imported project to. Ignored when
    /// a drive project is open.
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ImportArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    anyhow::ensure!(args.source.is_file(), "import source `{}` not found", args.source.display());

    let mut runtime = super::launch().await?;
    runtime
        .reconciler
        .import_file(Some(&args.source), args.file.as_deref())
        .await
        .with_context(|| format!("failed to import `{}`", args.source.display()))?;

    let summary = ProjectSummary::capture(&runtime.reconciler);
    runtime.engine().shutdown();
    output::print_output(format, &summary, format_human)?;
    Ok(())
}

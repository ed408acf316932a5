// `storyverse export` — write a pretty-printed backup of the open project.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Destination file.
    pub out: PathBuf,

    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ExportResult {
    name: Option<String>,
    path: PathBuf,
}

pub async fn run(args: ExportArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let runtime = super::launch().await?;
    let engine = runtime.engine();
    anyhow::ensure!(engine.snapshot().is_some(), "no project is open. Run: storyverse status");

    engine.download_backup(&args.out).await?;
    let result = ExportResult { name: engine.project_name(), path: args.out };
    engine.shutdown();
    output::print_output(format, &result, |result| {
        format!("Exported {} to {}", result.name.as_deref().unwrap_or("project"), result.path.display())
    })?;
    Ok(())
}

// `storyverse novel` — novel-level edits on the live project.

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct NovelArgs {
    #[command(subcommand)]
    command: NovelCommand,
}

#[derive(Debug, Subcommand)]
enum NovelCommand {
    /// Add a novel and save it
    Add(NovelAddArgs),
}

#[derive(Debug, Args)]
struct NovelAddArgs {
    title: String,

    #[arg(long, default_value = "")]
    description: String,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct NovelAdded {
    id: String,
    title: String,
}

impl NovelArgs {
    pub fn json(&self) -> bool {
        match &self.command {
            NovelCommand::Add(args) => args.json,
        }
    }
}

pub async fn run(args: NovelArgs) -> anyhow::Result<()> {
    match args.command {
        NovelCommand::Add(args) => add(args).await,
    }
}

async fn add(args: NovelAddArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let runtime = super::launch_ready().await?;
    let engine = runtime.engine();

    let id = engine
        .edit(|project| project.add_novel(&args.title, &args.description, Utc::now()))
        .context("no project is open")?;
    engine.flush().await.context("novel was added but could not be saved")?;
    engine.shutdown();

    let added = NovelAdded { id, title: args.title };
    output::print_output(format, &added, |added| format!("Added novel {} ({})", added.title, added.id))?;
    Ok(())
}

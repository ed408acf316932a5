// `storyverse chapter` — chapter edits on the live project.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ChapterArgs {
    #[command(subcommand)]
    command: ChapterCommand,
}

#[derive(Debug, Subcommand)]
enum ChapterCommand {
    /// Append an empty chapter to a novel
    Add(ChapterAddArgs),
    /// Replace a chapter's content from a file
    Write(ChapterWriteArgs),
}

#[derive(Debug, Args)]
struct ChapterAddArgs {
    novel_id: String,
    title: String,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ChapterWriteArgs {
    novel_id: String,
    chapter_id: String,

    /// File holding the new chapter markup.
    #[arg(long, value_name = "FILE")]
    from: PathBuf,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct ChapterResult {
    novel_id: String,
    chapter_id: String,
    word_count: u64,
}

impl ChapterArgs {
    pub fn json(&self) -> bool {
        match &self.command {
            ChapterCommand::Add(args) => args.json,
            ChapterCommand::Write(args) => args.json,
        }
    }
}

pub async fn run(args: ChapterArgs) -> anyhow::Result<()> {
    match args.command {
        ChapterCommand::Add(args) => add(args).await,
        ChapterCommand::Write(args) => write(args).await,
    }
}

async fn add(args: ChapterAddArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let runtime = super::launch_ready().await?;
    let engine = runtime.engine();

    let chapter_id = engine
        .edit(|project| project.add_chapter(&args.novel_id, &args.title, Utc::now()))
        .context("no project is open")??;
    engine.flush().await.context("chapter was added but could not be saved")?;
    engine.shutdown();

    let result = ChapterResult { novel_id: args.novel_id, chapter_id, word_count: 0 };
    output::print_output(format, &result, |result| format!("Added chapter {}", result.chapter_id))?;
    Ok(())
}

async fn write(args: ChapterWriteArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let content = tokio::fs::read_to_string(&args.from)
        .await
        .with_context(|| format!("failed to read `{}`", args.from.display()))?;
    let runtime = super::launch_ready().await?;
    let engine = runtime.engine();

    engine
        .edit(|project| {
            project.update_chapter_content(&args.novel_id, &args.chapter_id, &content, Utc::now())
        })
        .context("no project is open")??;
    engine.flush().await.context("chapter was updated but could not be saved")?;

    let word_count = engine
        .snapshot()
        .and_then(|project| {
            project.novel(&args.novel_id)?.chapter(&args.chapter_id).map(|chapter| chapter.word_count)
        })
        .unwrap_or_default();
    engine.shutdown();

    let result = ChapterResult { novel_id: args.novel_id, chapter_id: args.chapter_id, word_count };
    output::print_output(format, &result, |result| {
        format!("Saved chapter {} ({} words)", result.chapter_id, result.word_count)
    })?;
    Ok(())
}

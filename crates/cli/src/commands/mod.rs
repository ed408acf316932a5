// CLI subcommand dispatch.

use anyhow::bail;
use clap::Subcommand;
use tracing::{debug, warn};

use storyverse_engine::config::EngineConfig;
use storyverse_engine::runtime::{Runtime, StateLocation};
use storyverse_engine::AppState;

pub mod chapter;
pub mod drive;
pub mod export;
pub mod import;
pub mod new;
pub mod novel;
pub mod resolve;
pub mod status;

#[derive(Subcommand)]
pub enum Command {
    /// Create a new local project file
    New(new::NewArgs),
    /// Sanitize a JSON file into a new project
    Import(import::ImportArgs),
    /// Restore the last project and show where it lives
    Status(status::StatusArgs),
    /// Write a backup copy of the open project
    Export(export::ExportArgs),
    /// Manage novels in the open project
    Novel(novel::NovelArgs),
    /// Manage chapters in the open project
    Chapter(chapter::ChapterArgs),
    /// Connect or disconnect drive sync
    Drive(drive::DriveArgs),
    /// Resolve a local/drive conflict
    Resolve(resolve::ResolveArgs),
}

impl Command {
    /// Whether `--json` was passed to the subcommand.
    pub fn json(&self) -> bool {
        match self {
            Self::New(args) => args.json,
            Self::Import(args) => args.json,
            Self::Status(args) => args.json,
            Self::Export(args) => args.json,
            Self::Novel(args) => args.json(),
            Self::Chapter(args) => args.json(),
            Self::Drive(args) => args.json(),
            Self::Resolve(args) => args.json,
        }
    }

    /// Subcommand name as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::New(_) => "new",
            Self::Import(_) => "import",
            Self::Status(_) => "status",
            Self::Export(_) => "export",
            Self::Novel(_) => "novel",
            Self::Chapter(_) => "chapter",
            Self::Drive(_) => "drive",
            Self::Resolve(_) => "resolve",
        }
    }
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    let name = cmd.name();
    debug!(command = name, "running command");
    let result = dispatch(cmd).await;
    if let Err(error) = &result {
        let message = format!("{error:#}");
        warn!(command = name, error = %message, "command failed");
    }
    result
}

async fn dispatch(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::New(args) => new::run(args).await,
        Command::Import(args) => import::run(args).await,
        Command::Status(args) => status::run(args).await,
        Command::Export(args) => export::run(args).await,
        Command::Novel(args) => novel::run(args).await,
        Command::Chapter(args) => chapter::run(args).await,
        Command::Drive(args) => drive::run(args).await,
        Command::Resolve(args) => resolve::run(args).await,
    }
}

/// Open the persistent runtime without restoring a project.
pub(crate) fn open_runtime() -> anyhow::Result<Runtime> {
    Runtime::open(EngineConfig::load(), StateLocation::Persistent)
}

/// Open the persistent runtime and restore the live project, as an app
/// launch would.
pub(crate) async fn launch() -> anyhow::Result<Runtime> {
    let mut runtime = open_runtime()?;
    runtime.reconciler.startup().await;
    Ok(runtime)
}

/// Like [`launch`], but fails unless a project is live and writable.
pub(crate) async fn launch_ready() -> anyhow::Result<Runtime> {
    let runtime = launch().await?;
    match runtime.reconciler.state() {
        AppState::Ready { .. } => Ok(runtime),
        AppState::DriveConflict(_) => {
            bail!("a local/drive conflict is pending. Run: storyverse resolve keep-local|keep-remote")
        }
        other => bail!("no project is open (state `{}`). Run: storyverse status", other.label()),
    }
}

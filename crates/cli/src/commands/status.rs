// `storyverse status` — restore the last project and report where it lives.

use clap::Args;
use serde::Serialize;

use storyverse_engine::engine::{SaveFailure, SaveStatus};
use storyverse_engine::{AppState, Reconciler};

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

/// What every project-touching command prints on success.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub state: AppState,
    pub name: Option<String>,
    pub save_status: SaveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SaveFailure>,
    pub novels: usize,
    pub story_ideas: usize,
    pub word_count: u64,
}

impl ProjectSummary {
    pub fn capture(reconciler: &Reconciler) -> Self {
        let engine = reconciler.engine();
        let snapshot = engine.snapshot();
        Self {
            state: reconciler.state().clone(),
            name: engine.project_name(),
            save_status: engine.status(),
            last_error: engine.last_error(),
            novels: snapshot.as_ref().map_or(0, |project| project.novels.len()),
            story_ideas: snapshot.as_ref().map_or(0, |project| project.story_ideas.len()),
            word_count: snapshot.as_ref().map_or(0, |project| project.total_word_count()),
        }
    }
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let runtime = super::launch().await?;
    let summary = ProjectSummary::capture(&runtime.reconciler);
    runtime.engine().shutdown();
    output::print_output(format, &summary, format_human)?;
    Ok(())
}

pub fn format_human(summary: &ProjectSummary) -> String {
    let mut lines = Vec::new();
    match &summary.state {
        AppState::Loading => lines.push("Loading…".to_string()),
        AppState::Welcome { message } => {
            lines.push("No project open.".to_string());
            if let Some(message) = message {
                lines.push(format!("  {message}"));
            }
            lines.push("  Run: storyverse new <name> --file <path>".to_string());
        }
        AppState::Ready { backend } => {
            let name = summary.name.as_deref().unwrap_or("Untitled");
            lines.push(format!("{name} ({} backend)", backend.as_str()));
            lines.push(format!(
                "  {} novels, {} story ideas, {} words",
                summary.novels, summary.story_ideas, summary.word_count
            ));
            lines.push(format!("  Save status: {}", summary.save_status.as_str()));
            if let Some(failure) = &summary.last_error {
                lines.push(format!("  Last save failed: {failure}"));
            }
        }
        AppState::DriveNoProject { local_available } => {
            lines.push("Signed in, but no project was found on your drive.".to_string());
            if *local_available {
                lines.push("  A local project is available to upload.".to_string());
            }
        }
        AppState::DriveConflict(candidates) => {
            lines.push("Both a local and a drive copy exist.".to_string());
            for (label, candidate) in [("local", &candidates.local), ("drive", &candidates.remote)] {
                lines.push(format!(
                    "  {label}: {} ({} novels, {} words)",
                    candidate.name, candidate.novels, candidate.word_count
                ));
            }
            if candidates.identical() {
                lines.push("  The two copies are identical.".to_string());
            }
            lines.push("  Run: storyverse resolve keep-local|keep-remote".to_string());
        }
    }
    lines.join("\n")
}

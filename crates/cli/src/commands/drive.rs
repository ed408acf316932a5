// `storyverse drive` — connect or disconnect drive sync.

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Args, Subcommand};

use storyverse_engine::session::AuthTokens;

use crate::output::{self, OutputFormat};

use super::status::{format_human, ProjectSummary};

#[derive(Debug, Args)]
pub struct DriveArgs {
    #[command(subcommand)]
    command: DriveCommand,
}

#[derive(Debug, Subcommand)]
enum DriveCommand {
    /// Store drive tokens and reconcile the local and drive projects
    SignIn(SignInArgs),
    /// Forget drive tokens and close any drive project
    SignOut(SignOutArgs),
}

#[derive(Debug, Args)]
struct SignInArgs {
    /// OAuth access token with drive file scope.
    #[arg(long)]
    access_token: String,

    /// Refresh token used to renew the access token.
    #[arg(long)]
    refresh_token: Option<String>,

    /// Seconds until the access token expires.
    #[arg(long, value_name = "SECONDS")]
    expires_in: Option<i64>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct SignOutArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

impl DriveArgs {
    pub fn json(&self) -> bool {
        match &self.command {
            DriveCommand::SignIn(args) => args.json,
            DriveCommand::SignOut(args) => args.json,
        }
    }
}

pub async fn run(args: DriveArgs) -> anyhow::Result<()> {
    match args.command {
        DriveCommand::SignIn(args) => sign_in(args).await,
        DriveCommand::SignOut(args) => sign_out(args).await,
    }
}

fn tokens_from_args(args: &SignInArgs) -> AuthTokens {
    AuthTokens {
        access_token: args.access_token.trim().to_string(),
        refresh_token: args.refresh_token.clone().filter(|token| !token.trim().is_empty()),
        expires_at: args.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
    }
}

async fn sign_in(args: SignInArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let mut runtime = super::launch().await?;
    runtime
        .reconciler
        .sign_in(tokens_from_args(&args))
        .await
        .context("drive sign-in failed")?;

    let summary = ProjectSummary::capture(&runtime.reconciler);
    runtime.engine().shutdown();
    output::print_output(format, &summary, format_human)?;
    Ok(())
}

async fn sign_out(args: SignOutArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let mut runtime = super::launch().await?;
    runtime.reconciler.sign_out().await;

    let summary = ProjectSummary::capture(&runtime.reconciler);
    output::print_output(format, &summary, |_| "Signed out of drive.".to_string())?;
    Ok(())
}

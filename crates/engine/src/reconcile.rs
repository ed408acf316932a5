// Startup reconciliation: decide which document becomes live, and run the
// user actions that move between application states.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use storyverse_common::format::{content_digest, parse_project, project_name_from_path, FormatError};
use storyverse_common::types::ProjectData;

use crate::backend::{ActiveBackend, BackendError, BackendKind, DriveBackend, LocalFileBackend, StorageBackend};
use crate::engine::{PersistenceEngine, SaveFailure};
use crate::session::{AuthTokens, SessionProvider};

/// One side of a potential conflict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectCandidate {
    pub name: String,
    #[serde(skip)]
    pub project: ProjectData,
    /// SHA-256 of the serialized document.
    pub digest: String,
    pub novels: usize,
    pub word_count: u64,
}

impl ProjectCandidate {
    pub fn new(name: String, project: ProjectData) -> Self {
        Self {
            digest: content_digest(&project),
            novels: project.novels.len(),
            word_count: project.total_word_count(),
            name,
            project,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictCandidates {
    pub local: ProjectCandidate,
    pub remote: ProjectCandidate,
}

impl ConflictCandidates {
    /// Both copies serialize to the same bytes.
    pub fn identical(&self) -> bool {
        self.local.digest == self.remote.digest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AppState {
    Loading,
    Welcome { message: Option<String> },
    Ready { backend: BackendKind },
    DriveNoProject { local_available: bool },
    DriveConflict(Box<ConflictCandidates>),
}

impl AppState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Welcome { .. } => "welcome",
            Self::Ready { .. } => "ready",
            Self::DriveNoProject { .. } => "drive_no_project",
            Self::DriveConflict(_) => "drive_conflict",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("`{action}` is not available in the `{state}` state")]
    InvalidState { action: &'static str, state: &'static str },

    #[error("no local project to upload")]
    NoLocalProject,

    #[error("failed to read `{}`: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("save failed: {0}")]
    Save(#[from] SaveFailure),

    #[error(transparent)]
    Format(#[from] FormatError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    ColdStart,
    SignIn,
}

pub struct Reconciler {
    engine: PersistenceEngine,
    local: Arc<LocalFileBackend>,
    drive: Arc<DriveBackend>,
    session: Arc<dyn SessionProvider>,
    state: AppState,
}

impl Reconciler {
    pub fn new(
        engine: PersistenceEngine,
        local: Arc<LocalFileBackend>,
        drive: Arc<DriveBackend>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self { engine, local, drive, session, state: AppState::Loading }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn engine(&self) -> &PersistenceEngine {
        &self.engine
    }

    pub fn local(&self) -> &LocalFileBackend {
        &self.local
    }

    // ── Startup ──────────────────────────────────────────────────────

    /// Restore the session and the local project, then pick the live document.
    pub async fn startup(&mut self) -> &AppState {
        self.state = AppState::Loading;
        let next = match self.reconcile(Trigger::ColdStart).await {
            Ok(state) => state,
            Err(error) => self.fail(error).await,
        };
        self.enter(next)
    }

    async fn reconcile(&self, trigger: Trigger) -> Result<AppState, ReconcileError> {
        let session = self.session.restore_session().await?;
        let local = self.local_candidate().await?;

        if session.is_none() {
            return match local {
                Some(local) => {
                    self.engine.load_document(local.name, local.project);
                    self.attach(ActiveBackend::Local(self.local.clone())).await;
                    Ok(AppState::Ready { backend: BackendKind::Local })
                }
                None => {
                    self.engine.reset();
                    Ok(AppState::Welcome { message: None })
                }
            };
        }

        let remote = self.remote_candidate().await?;
        match (remote, local) {
            (Some(remote), Some(local)) => {
                info!(
                    local_digest = %local.digest,
                    remote_digest = %remote.digest,
                    "local and drive copies both exist"
                );
                // Keep the local copy visible but write nowhere until resolved.
                self.engine.load_document(local.name.clone(), local.project.clone());
                self.engine.set_backend(ActiveBackend::None);
                Ok(AppState::DriveConflict(Box::new(ConflictCandidates { local, remote })))
            }
            (Some(remote), None) => {
                self.engine.load_document(remote.name, remote.project);
                self.attach(ActiveBackend::Drive(self.drive.clone())).await;
                Ok(AppState::Ready { backend: BackendKind::Drive })
            }
            (None, Some(local)) if trigger == Trigger::SignIn => {
                self.push_to_drive(local).await?;
                Ok(AppState::Ready { backend: BackendKind::Drive })
            }
            (None, local) => {
                self.engine.reset();
                Ok(AppState::DriveNoProject { local_available: local.is_some() })
            }
        }
    }

    async fn fail(&self, error: ReconcileError) -> AppState {
        error!(error = %error, "could not restore project; signing out");
        if let Err(sign_out) = self.session.sign_out().await {
            warn!(error = %sign_out, "forced sign-out failed");
        }
        self.engine.reset();
        AppState::Welcome { message: Some(format!("Could not open your project: {error}")) }
    }

    async fn local_candidate(&self) -> Result<Option<ProjectCandidate>, ReconcileError> {
        let Some(loaded) = self.local.load().await? else {
            return Ok(None);
        };
        let (name, project) = loaded.into_project()?;
        Ok(Some(ProjectCandidate::new(name, project)))
    }

    async fn remote_candidate(&self) -> Result<Option<ProjectCandidate>, ReconcileError> {
        let Some(loaded) = self.drive.load().await? else {
            return Ok(None);
        };
        let (name, project) = loaded.into_project()?;
        Ok(Some(ProjectCandidate::new(name, project)))
    }

    // ── Drive actions ────────────────────────────────────────────────

    /// Keep the local copy: push it to the drive, then forget it locally.
    pub async fn resolve_overwrite_remote(&mut self) -> Result<&AppState, ReconcileError> {
        self.require_conflict("resolve_overwrite_remote")?;
        self.flush_quietly().await;
        self.attach(ActiveBackend::Drive(self.drive.clone())).await;
        self.engine.force_save().await?;
        self.local.forget().await?;
        info!("conflict resolved in favour of the local copy");
        Ok(self.enter(AppState::Ready { backend: BackendKind::Drive }))
    }

    /// Keep the drive copy: make it live and forget the local one.
    pub async fn resolve_discard_local(&mut self) -> Result<&AppState, ReconcileError> {
        let remote = self.require_conflict("resolve_discard_local")?.remote.clone();
        self.flush_quietly().await;
        self.engine.load_document(remote.name, remote.project);
        self.attach(ActiveBackend::Drive(self.drive.clone())).await;
        self.local.forget().await?;
        info!("conflict resolved in favour of the drive copy");
        Ok(self.enter(AppState::Ready { backend: BackendKind::Drive }))
    }

    pub async fn create_on_drive(&mut self, name: &str) -> Result<&AppState, ReconcileError> {
        self.require_no_drive_project("create_on_drive")?;
        self.engine.load_document(name, ProjectData::empty());
        self.attach(ActiveBackend::Drive(self.drive.clone())).await;
        self.engine.force_save().await?;
        Ok(self.enter(AppState::Ready { backend: BackendKind::Drive }))
    }

    pub async fn upload_local_to_drive(&mut self) -> Result<&AppState, ReconcileError> {
        self.require_no_drive_project("upload_local_to_drive")?;
        let local = self.local_candidate().await?.ok_or(ReconcileError::NoLocalProject)?;
        self.push_to_drive(local).await?;
        Ok(self.enter(AppState::Ready { backend: BackendKind::Drive }))
    }

    async fn push_to_drive(&self, local: ProjectCandidate) -> Result<(), ReconcileError> {
        info!(name = %local.name, "uploading local project to drive");
        self.engine.load_document(local.name, local.project);
        self.attach(ActiveBackend::Drive(self.drive.clone())).await;
        self.engine.force_save().await?;
        self.local.forget().await?;
        Ok(())
    }

    /// Store the tokens, then re-run the decision table with upload allowed.
    pub async fn sign_in(&mut self, tokens: AuthTokens) -> Result<&AppState, ReconcileError> {
        self.flush_quietly().await;
        self.session.sign_in(tokens).await?;
        self.state = AppState::Loading;
        let next = match self.reconcile(Trigger::SignIn).await {
            Ok(state) => state,
            Err(error) => self.fail(error).await,
        };
        Ok(self.enter(next))
    }

    pub async fn sign_out(&mut self) -> &AppState {
        self.flush_quietly().await;
        if let Err(error) = self.session.sign_out().await {
            warn!(error = %error, "sign-out failed");
        }
        if let Err(error) = self.drive.forget().await {
            warn!(error = %error, "failed to forget drive file id");
        }
        if self.engine.is_dirty() && self.engine.backend_kind().is_none() {
            warn!(state = self.state.label(), "signing out discards edits made while persistence was withheld");
        }
        self.engine.reset();
        self.enter(AppState::Welcome { message: None })
    }

    // ── Local actions ────────────────────────────────────────────────

    /// Start an empty local project, written to `path` when given.
    pub async fn new_local_project(&mut self, name: &str, path: Option<&Path>) -> Result<&AppState, ReconcileError> {
        self.engine.close().await?;
        self.local.forget().await?;
        if let Some(path) = path {
            self.local.attach_handle(path)?;
        }
        self.engine.load_document(name, ProjectData::empty());
        self.attach(ActiveBackend::Local(self.local.clone())).await;
        self.engine.force_save().await?;
        Ok(self.enter(AppState::Ready { backend: BackendKind::Local }))
    }

    /// Open an existing project file. `None` means the picker was dismissed.
    pub async fn open_local_file(&mut self, path: Option<&Path>) -> Result<&AppState, ReconcileError> {
        let Some(path) = path.filter(|path| path.is_file()) else {
            info!("open cancelled");
            return Ok(&self.state);
        };
        let project = read_project(path).await?;
        self.engine.close().await?;
        self.local.forget().await?;
        let handle = self.local.attach_handle(path)?;
        self.engine.load_document(handle.name, project);
        self.attach(ActiveBackend::Local(self.local.clone())).await;
        Ok(self.enter(AppState::Ready { backend: BackendKind::Local }))
    }

    /// Sanitize an arbitrary JSON file into a new live project.
    ///
    /// Goes to the drive when a drive project is open, otherwise to `target`
    /// (or the local backup when no target is given).
    pub async fn import_file(
        &mut self,
        path: Option<&Path>,
        target: Option<&Path>,
    ) -> Result<&AppState, ReconcileError> {
        let Some(path) = path else {
            info!("import cancelled");
            return Ok(&self.state);
        };
        let project = read_project(path).await?;
        let name = project_name_from_path(path);
        let to_drive = self.state == AppState::Ready { backend: BackendKind::Drive };

        self.engine.close().await?;
        let (backend, kind) = if to_drive {
            (ActiveBackend::Drive(self.drive.clone()), BackendKind::Drive)
        } else {
            self.local.forget().await?;
            if let Some(target) = target {
                self.local.attach_handle(target)?;
            }
            (ActiveBackend::Local(self.local.clone()), BackendKind::Local)
        };
        self.engine.load_document(name.as_str(), project);
        self.attach(backend).await;
        self.engine.force_save().await?;
        info!(name = %name, backend = kind.as_str(), "imported project");
        Ok(self.enter(AppState::Ready { backend: kind }))
    }

    /// Flush and close. A failed flush keeps the project open.
    pub async fn close_project(&mut self) -> Result<&AppState, ReconcileError> {
        self.engine.close().await?;
        Ok(self.enter(AppState::Welcome { message: None }))
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn enter(&mut self, state: AppState) -> &AppState {
        info!(from = self.state.label(), to = state.label(), "app state changed");
        self.state = state;
        &self.state
    }

    async fn attach(&self, backend: ActiveBackend) {
        if let Some(storage) = backend.storage() {
            // Problems surface again, actionably, on the next save.
            if let Err(error) = storage.connect().await {
                warn!(backend = storage.kind().as_str(), error = %error, "backend connect failed");
            }
        }
        self.engine.set_backend(backend);
    }

    async fn flush_quietly(&self) {
        if let Err(failure) = self.engine.flush().await {
            warn!(error = %failure, "flush before state change failed");
        }
    }

    fn require_conflict(&self, action: &'static str) -> Result<&ConflictCandidates, ReconcileError> {
        match &self.state {
            AppState::DriveConflict(candidates) => Ok(candidates),
            other => Err(ReconcileError::InvalidState { action, state: other.label() }),
        }
    }

    fn require_no_drive_project(&self, action: &'static str) -> Result<(), ReconcileError> {
        match &self.state {
            AppState::DriveNoProject { .. } => Ok(()),
            other => Err(ReconcileError::InvalidState { action, state: other.label() }),
        }
    }
}

async fn read_project(path: &Path) -> Result<ProjectData, ReconcileError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ReconcileError::Read { path: path.to_path_buf(), source })?;
    Ok(parse_project(&bytes)?)
}

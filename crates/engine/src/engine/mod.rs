// Persistence engine: owns the live document and its dirty/save lifecycle.
//
// Edits are applied synchronously and schedule a debounced save on a tokio
// task. At most one backend write is in flight; `flush` drains it.

pub mod status;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use storyverse_common::format::to_pretty_json;
use storyverse_common::types::ProjectData;

use crate::backend::local::write_atomically;
use crate::backend::{ActiveBackend, BackendError, BackendKind};
use crate::config::SaveConfig;

pub use status::{LifecycleEvent, SaveFailure, SaveOutcome, SaveStatus};

/// Cheaply cloneable handle; clones share one engine.
#[derive(Clone)]
pub struct PersistenceEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: SaveConfig,
    state: Mutex<EngineState>,
    status: watch::Sender<SaveStatus>,
}

#[derive(Default)]
struct EngineState {
    document: Option<Arc<ProjectData>>,
    project_name: Option<String>,
    backend: ActiveBackend,
    /// Bumped on every dirtying update.
    revision: u64,
    /// Last revision known to be durable.
    persisted_revision: u64,
    /// Bumped whenever the document is replaced wholesale.
    epoch: u64,
    saving: bool,
    status: SaveStatus,
    last_error: Option<SaveFailure>,
    debounce: Option<JoinHandle<()>>,
    debounce_generation: u64,
    saved_reset: Option<JoinHandle<()>>,
}

impl EngineState {
    fn is_dirty(&self) -> bool {
        self.revision != self.persisted_revision
    }

    fn cancel_debounce(&mut self) {
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_debounce();
        if let Some(handle) = self.saved_reset.take() {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner).cancel_timers();
    }
}

/// Clears the in-flight flag however the save future ends.
struct SavingGuard<'a> {
    engine: &'a PersistenceEngine,
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.engine.lock();
        state.saving = false;
        if state.status == SaveStatus::Saving {
            // Cancelled mid-write.
            self.engine.set_status(&mut state, SaveStatus::Unsaved);
        }
    }
}

impl PersistenceEngine {
    pub fn new(config: SaveConfig) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        Self { inner: Arc::new(Inner { config, state: Mutex::new(EngineState::default()), status }) }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Current document, shared read-only.
    pub fn snapshot(&self) -> Option<Arc<ProjectData>> {
        self.lock().document.clone()
    }

    pub fn project_name(&self) -> Option<String> {
        self.lock().project_name.clone()
    }

    pub fn status(&self) -> SaveStatus {
        self.lock().status
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status.subscribe()
    }

    pub fn last_error(&self) -> Option<SaveFailure> {
        self.lock().last_error.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().is_dirty()
    }

    pub fn is_saving(&self) -> bool {
        self.lock().saving
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.lock().backend.kind()
    }

    /// Best-effort warning before the host goes away with unsaved work.
    pub fn should_warn_before_unload(&self) -> bool {
        let state = self.lock();
        state.is_dirty() || state.status == SaveStatus::Error
    }

    // ── Document lifecycle ───────────────────────────────────────────

    /// Switch persistence target. `ActiveBackend::None` withholds saves.
    pub fn set_backend(&self, backend: ActiveBackend) {
        let mut state = self.lock();
        debug!(from = ?state.backend, to = ?backend, "switching backend");
        state.backend = backend;
    }

    /// Install a document read from a backend. It starts clean.
    pub fn load_document(&self, name: impl Into<String>, project: ProjectData) {
        let name = name.into();
        let mut state = self.lock();
        state.cancel_timers();
        state.epoch += 1;
        state.revision += 1;
        state.persisted_revision = state.revision;
        state.document = Some(Arc::new(project));
        state.project_name = Some(name.clone());
        state.last_error = None;
        self.set_status(&mut state, SaveStatus::Idle);
        info!(name = %name, "loaded project");
    }

    /// Drop the document and backend without saving.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.cancel_timers();
        state.epoch += 1;
        state.persisted_revision = state.revision;
        state.document = None;
        state.project_name = None;
        state.backend = ActiveBackend::None;
        state.last_error = None;
        self.set_status(&mut state, SaveStatus::Idle);
    }

    /// Cancel pending timers. The document is kept.
    pub fn shutdown(&self) {
        self.lock().cancel_timers();
    }

    /// The single mutation entry point.
    ///
    /// The updater runs under the engine lock and must not call back into
    /// the engine. Returns whether the document changed.
    pub fn update_document<F>(&self, updater: F) -> bool
    where
        F: FnOnce(Option<&ProjectData>) -> Option<ProjectData>,
    {
        let mut state = self.lock();
        let next = updater(state.document.as_deref());
        if next.as_ref() == state.document.as_deref() {
            return false;
        }
        state.document = next.map(Arc::new);
        state.revision += 1;
        self.set_status(&mut state, SaveStatus::Unsaved);
        self.schedule_debounce(&mut state);
        true
    }

    /// Edit a copy of the open document. `None` when nothing is open.
    pub fn edit<T>(&self, edit: impl FnOnce(&mut ProjectData) -> T) -> Option<T> {
        let mut result = None;
        self.update_document(|current| {
            let mut next = current?.clone();
            result = Some(edit(&mut next));
            Some(next)
        });
        result
    }

    // ── Saving ───────────────────────────────────────────────────────

    /// Persist the current snapshot if dirty and nothing else is saving.
    pub async fn save(&self) -> SaveOutcome {
        let (storage, snapshot, revision, epoch) = {
            let mut state = self.lock();
            if state.saving {
                debug!("save already in flight");
                return SaveOutcome::AlreadySaving;
            }
            if !state.is_dirty() {
                return SaveOutcome::NotDirty;
            }
            let Some(storage) = state.backend.storage() else {
                debug!("no active backend; keeping document dirty");
                return SaveOutcome::NoBackend;
            };
            state.saving = true;
            self.set_status(&mut state, SaveStatus::Saving);
            (storage, state.document.clone(), state.revision, state.epoch)
        };
        let guard = SavingGuard { engine: self };

        let result = match snapshot.as_deref() {
            Some(project) => storage.save(project).await,
            None => Ok(()),
        };
        let outcome = self.finish_save(storage.kind(), revision, epoch, result);
        drop(guard);
        outcome
    }

    fn finish_save(
        &self,
        kind: BackendKind,
        revision: u64,
        epoch: u64,
        result: Result<(), BackendError>,
    ) -> SaveOutcome {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(backend = kind.as_str(), "document replaced during save; result ignored");
            return SaveOutcome::Discarded;
        }
        match result {
            Ok(()) => {
                state.persisted_revision = state.persisted_revision.max(revision);
                state.last_error = None;
                if state.revision == revision {
                    self.set_status(&mut state, SaveStatus::Saved);
                    self.schedule_saved_reset(&mut state);
                    info!(backend = kind.as_str(), revision, "project saved");
                    SaveOutcome::Saved
                } else {
                    self.set_status(&mut state, SaveStatus::Unsaved);
                    debug!(backend = kind.as_str(), revision, latest = state.revision, "edited during save");
                    // A debounce that fired mid-save was swallowed by AlreadySaving.
                    if state.debounce.is_none() {
                        self.schedule_debounce(&mut state);
                    }
                    SaveOutcome::SavedWithPendingChanges
                }
            }
            Err(error) => {
                let failure = SaveFailure::from_error(&error);
                warn!(backend = kind.as_str(), kind = ?failure.kind, error = %error, "save failed");
                state.last_error = Some(failure);
                self.set_status(&mut state, SaveStatus::Error);
                SaveOutcome::Failed
            }
        }
    }

    /// Cancel the debounce, save if needed, and wait for the write to land.
    pub async fn flush(&self) -> Result<(), SaveFailure> {
        let needs_save = {
            let mut state = self.lock();
            state.cancel_debounce();
            !state.saving && state.is_dirty()
        };
        if needs_save {
            self.save().await;
        }
        self.wait_until_idle().await;

        // An edit may have landed while another caller's save was in flight.
        let retry = {
            let state = self.lock();
            state.is_dirty() && state.status != SaveStatus::Error && state.backend.kind().is_some()
        };
        if retry {
            self.lock().cancel_debounce();
            self.save().await;
            self.wait_until_idle().await;
        }

        let state = self.lock();
        match (&state.last_error, state.status) {
            (Some(failure), SaveStatus::Error) => Err(failure.clone()),
            _ => Ok(()),
        }
    }

    /// Mark the document dirty and flush it to the active backend.
    pub async fn force_save(&self) -> Result<(), SaveFailure> {
        {
            let mut state = self.lock();
            state.revision += 1;
            self.set_status(&mut state, SaveStatus::Unsaved);
        }
        self.flush().await
    }

    async fn wait_until_idle(&self) {
        let poll = self.inner.config.flush_poll_interval();
        while self.is_saving() {
            tokio::time::sleep(poll).await;
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        debug!(?event, "lifecycle event");
        if let Err(failure) = self.flush().await {
            warn!(?event, error = %failure, "flush on lifecycle event failed");
        }
    }

    /// Flush, then write the pretty-printed document to `path`.
    pub async fn download_backup(&self, path: &Path) -> Result<()> {
        if let Err(failure) = self.flush().await {
            warn!(error = %failure, "exporting a copy that is not yet saved");
        }
        let project = self.snapshot().context("no project is open")?;
        write_atomically(path.to_path_buf(), to_pretty_json(&project))
            .await
            .with_context(|| format!("failed to write backup to `{}`", path.display()))?;
        info!(path = %path.display(), "downloaded project backup");
        Ok(())
    }

    /// Flush, then discard the document and detach the backend.
    ///
    /// A failed flush leaves the project open.
    pub async fn close(&self) -> Result<(), SaveFailure> {
        self.flush().await?;
        self.reset();
        info!("closed project");
        Ok(())
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn set_status(&self, state: &mut EngineState, status: SaveStatus) {
        if status != SaveStatus::Saved {
            if let Some(handle) = state.saved_reset.take() {
                handle.abort();
            }
        }
        state.status = status;
        self.inner.status.send_replace(status);
    }

    fn schedule_debounce(&self, state: &mut EngineState) {
        state.cancel_debounce();
        let Ok(runtime) = Handle::try_current() else {
            debug!("no async runtime; autosave waits for an explicit flush");
            return;
        };
        state.debounce_generation += 1;
        let generation = state.debounce_generation;
        let delay = self.inner.config.debounce();
        let weak = Arc::downgrade(&self.inner);

        state.debounce = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(engine) = PersistenceEngine::from_weak(&weak) else {
                return;
            };
            {
                let mut state = engine.lock();
                if state.debounce_generation != generation {
                    return;
                }
                // Detach so a later edit cannot abort the write below.
                state.debounce = None;
            }
            engine.save().await;
        }));
    }

    fn schedule_saved_reset(&self, state: &mut EngineState) {
        if let Some(handle) = state.saved_reset.take() {
            handle.abort();
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let delay = self.inner.config.saved_display();
        let weak = Arc::downgrade(&self.inner);

        state.saved_reset = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(engine) = PersistenceEngine::from_weak(&weak) else {
                return;
            };
            let mut state = engine.lock();
            if state.status == SaveStatus::Saved {
                state.saved_reset = None;
                engine.set_status(&mut state, SaveStatus::Idle);
            }
        }));
    }
}

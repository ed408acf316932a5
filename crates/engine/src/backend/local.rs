// Local-file backend: a user-chosen JSON file plus a backup copy in meta.db.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use storyverse_common::format::{project_name_from_path, to_pretty_json, UNTITLED_PROJECT};
use storyverse_common::types::ProjectData;

use super::{BackendError, BackendKind, LoadedProject, StorageBackend};
use crate::security::open_private_truncate;
use crate::store::{Slot, SlotStore};

/// Persisted reference to the project file the user picked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub name: String,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = project_name_from_path(&path);
        Self { path, name }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    /// Not granted yet, but the user can be asked.
    Prompt,
    Denied,
}

/// Read-write permission checks for a file handle.
///
/// Permission can be revoked at any time, so it is re-checked before every
/// load and save rather than cached.
#[async_trait]
pub trait PermissionBroker: Send + Sync {
    async fn query(&self, handle: &FileHandle) -> Permission;
    async fn request(&self, handle: &FileHandle) -> Permission;
}

/// Permission as the filesystem reports it. There is nobody to prompt, so
/// `request` answers the same as `query`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPermissionBroker;

#[async_trait]
impl PermissionBroker for FsPermissionBroker {
    async fn query(&self, handle: &FileHandle) -> Permission {
        match tokio::fs::metadata(&handle.path).await {
            Ok(meta) if meta.permissions().readonly() => Permission::Denied,
            Ok(_) => Permission::Granted,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                // Created lazily on first save; the directory must exist.
                let parent_exists = match handle.path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => {
                        tokio::fs::metadata(parent).await.map(|meta| meta.is_dir()).unwrap_or(false)
                    }
                    _ => true,
                };
                if parent_exists {
                    Permission::Granted
                } else {
                    Permission::Denied
                }
            }
            Err(_) => Permission::Denied,
        }
    }

    async fn request(&self, handle: &FileHandle) -> Permission {
        self.query(handle).await
    }
}

pub struct LocalFileBackend {
    slots: SlotStore,
    broker: Arc<dyn PermissionBroker>,
}

impl LocalFileBackend {
    pub fn new(slots: SlotStore, broker: Arc<dyn PermissionBroker>) -> Self {
        Self { slots, broker }
    }

    pub fn with_fs_permissions(slots: SlotStore) -> Self {
        Self::new(slots, Arc::new(FsPermissionBroker))
    }

    /// The remembered project file, if any.
    pub fn handle(&self) -> Result<Option<FileHandle>, BackendError> {
        let Some(raw) = self.slots.get(Slot::ProjectFileHandle)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(handle) => Ok(Some(handle)),
            Err(error) => {
                warn!(error = %error, "discarding unreadable project file handle");
                self.slots.delete(Slot::ProjectFileHandle)?;
                Ok(None)
            }
        }
    }

    /// Remember `path` as the project file. The file itself is not touched.
    pub fn attach_handle(&self, path: &Path) -> Result<FileHandle, BackendError> {
        let handle = FileHandle::new(path);
        let raw = serde_json::to_string(&handle)
            .map_err(|error| BackendError::Decode(error.to_string()))?;
        self.slots.set(Slot::ProjectFileHandle, &raw)?;
        info!(path = %handle.path.display(), "attached project file");
        Ok(handle)
    }

    /// Whether a handle or a backup copy is remembered.
    pub fn has_identity(&self) -> Result<bool, BackendError> {
        Ok(self.slots.contains(Slot::ProjectFileHandle)? || self.slots.contains(Slot::ProjectBackup)?)
    }

    async fn ensure_permission(&self, handle: &FileHandle) -> Result<(), BackendError> {
        let granted = match self.broker.query(handle).await {
            Permission::Granted => true,
            Permission::Prompt => self.broker.request(handle).await == Permission::Granted,
            Permission::Denied => false,
        };
        if granted {
            Ok(())
        } else {
            Err(BackendError::PermissionDenied { path: handle.path.clone() })
        }
    }

    async fn read_handle(&self, handle: &FileHandle) -> Result<Option<LoadedProject>, BackendError> {
        if let Err(error) = self.ensure_permission(handle).await {
            warn!(error = %error, "project file is not reachable; falling back to backup");
            return Ok(None);
        }
        let bytes = match tokio::fs::read(&handle.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %handle.path.display(), "project file not created yet");
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        let raw = serde_json::from_slice(&bytes).map_err(|error| {
            BackendError::Decode(format!("{}: {error}", handle.path.display()))
        })?;
        Ok(Some(LoadedProject { name: handle.name.clone(), raw }))
    }

    fn read_backup(&self, name: Option<&str>) -> Result<Option<LoadedProject>, BackendError> {
        let Some(raw) = self.slots.get(Slot::ProjectBackup)? else {
            return Ok(None);
        };
        let raw = serde_json::from_str(&raw)
            .map_err(|error| BackendError::Decode(format!("local backup: {error}")))?;
        let name = name.unwrap_or(UNTITLED_PROJECT).to_string();
        Ok(Some(LoadedProject { name, raw }))
    }
}

#[async_trait]
impl StorageBackend for LocalFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn connect(&self) -> Result<(), BackendError> {
        match self.handle()? {
            Some(handle) => self.ensure_permission(&handle).await,
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn load(&self) -> Result<Option<LoadedProject>, BackendError> {
        let handle = self.handle()?;
        if let Some(handle) = &handle {
            if let Some(loaded) = self.read_handle(handle).await? {
                return Ok(Some(loaded));
            }
        }
        self.read_backup(handle.as_ref().map(|handle| handle.name.as_str()))
    }

    async fn save(&self, project: &ProjectData) -> Result<(), BackendError> {
        let json = to_pretty_json(project);
        if let Some(handle) = self.handle()? {
            self.ensure_permission(&handle).await?;
            write_atomically(handle.path.clone(), json.clone()).await?;
            debug!(path = %handle.path.display(), bytes = json.len(), "wrote project file");
        }
        self.slots.set(Slot::ProjectBackup, &json)?;
        Ok(())
    }

    async fn forget(&self) -> Result<(), BackendError> {
        let had_handle = self.slots.delete(Slot::ProjectFileHandle)?;
        let had_backup = self.slots.delete(Slot::ProjectBackup)?;
        info!(had_handle, had_backup, "forgot local project identity");
        Ok(())
    }
}

/// Write to a uniquely named sibling temp file, then rename over the target.
///
/// A save and a backup download may target the same path concurrently. An
/// existing target keeps its permissions; new files are owner-only.
pub(crate) async fn write_atomically(path: PathBuf, contents: String) -> Result<(), BackendError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file_name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
        let result = fill_temp(&tmp, &path, contents.as_bytes()).and_then(|()| std::fs::rename(&tmp, &path));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    })
    .await
    .map_err(|error| BackendError::Io(std::io::Error::other(error.to_string())))??;
    Ok(())
}

fn fill_temp(tmp: &Path, target: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = open_private_truncate(tmp)?;
    file.write_all(contents)?;
    match std::fs::metadata(target) {
        Ok(existing) => file.set_permissions(existing.permissions())?,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::*;

    struct ScriptedBroker {
        query: Permission,
        request: Permission,
        requests: Mutex<usize>,
    }

    #[async_trait]
    impl PermissionBroker for ScriptedBroker {
        async fn query(&self, _handle: &FileHandle) -> Permission {
            self.query
        }

        async fn request(&self, _handle: &FileHandle) -> Permission {
            *self.requests.lock().unwrap() += 1;
            self.request
        }
    }

    fn sample_project() -> ProjectData {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut project = ProjectData::empty();
        project.add_novel("The Long Road", "", now);
        project
    }

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let backend = LocalFileBackend::with_fs_permissions(SlotStore::in_memory().unwrap());
        assert!(backend.load().await.unwrap().is_none());
        assert!(!backend.has_identity().unwrap());
    }

    #[tokio::test]
    async fn save_without_handle_writes_backup_only() {
        let slots = SlotStore::in_memory().unwrap();
        let backend = LocalFileBackend::with_fs_permissions(slots.clone());
        let original = sample_project();
        backend.save(&original).await.unwrap();

        assert!(slots.contains(Slot::ProjectBackup).unwrap());
        let loaded = backend.load().await.unwrap().expect("backup should load");
        assert_eq!(loaded.name, UNTITLED_PROJECT);
        let (_, project) = loaded.into_project().unwrap();
        assert_eq!(project, original);
    }

    #[tokio::test]
    async fn file_is_created_lazily_on_first_save() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("my_novel.json");
        let backend = LocalFileBackend::with_fs_permissions(SlotStore::in_memory().unwrap());

        let handle = backend.attach_handle(&path).unwrap();
        assert_eq!(handle.name, "my novel");
        assert!(!path.exists());

        backend.save(&sample_project()).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n  \"novels\""), "file should be pretty-printed");

        let loaded = backend.load().await.unwrap().expect("file should load");
        assert_eq!(loaded.name, "my novel");
    }

    #[tokio::test]
    async fn file_takes_precedence_over_backup() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("novel.json");
        let slots = SlotStore::in_memory().unwrap();
        let backend = LocalFileBackend::with_fs_permissions(slots.clone());
        backend.attach_handle(&path).unwrap();
        backend.save(&sample_project()).await.unwrap();

        slots.set(Slot::ProjectBackup, "{\"novels\":[]}").unwrap();
        let (_, project) = backend.load().await.unwrap().unwrap().into_project().unwrap();
        assert_eq!(project.novels.len(), 1);
    }

    #[tokio::test]
    async fn denied_permission_falls_back_to_backup_on_load_but_fails_save() {
        let slots = SlotStore::in_memory().unwrap();
        let broker = Arc::new(ScriptedBroker {
            query: Permission::Prompt,
            request: Permission::Denied,
            requests: Mutex::new(0),
        });
        let backend = LocalFileBackend::new(slots.clone(), broker.clone());
        backend.attach_handle(Path::new("/nowhere/novel.json")).unwrap();
        slots.set(Slot::ProjectBackup, "{\"novels\":[]}").unwrap();

        let loaded = backend.load().await.unwrap().expect("backup should load");
        assert_eq!(loaded.name, "novel");

        let error = backend.save(&sample_project()).await.unwrap_err();
        assert!(matches!(error, BackendError::PermissionDenied { .. }));
        assert_eq!(*broker.requests.lock().unwrap(), 2, "permission is re-checked every time");
    }

    #[tokio::test]
    async fn prompt_then_grant_allows_save() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("novel.json");
        let broker = Arc::new(ScriptedBroker {
            query: Permission::Prompt,
            request: Permission::Granted,
            requests: Mutex::new(0),
        });
        let backend = LocalFileBackend::new(SlotStore::in_memory().unwrap(), broker);
        backend.attach_handle(&path).unwrap();
        backend.save(&sample_project()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_parent_directory_is_denied() {
        let tmp = tempdir().unwrap();
        let handle = FileHandle::new(tmp.path().join("missing").join("novel.json"));
        assert_eq!(FsPermissionBroker.query(&handle).await, Permission::Denied);

        let handle = FileHandle::new(tmp.path().join("novel.json"));
        assert_eq!(FsPermissionBroker.query(&handle).await, Permission::Granted);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_decode_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("novel.json");
        std::fs::write(&path, "{ not json").unwrap();
        let backend = LocalFileBackend::with_fs_permissions(SlotStore::in_memory().unwrap());
        backend.attach_handle(&path).unwrap();
        assert!(matches!(backend.load().await, Err(BackendError::Decode(_))));
    }

    #[tokio::test]
    async fn forget_removes_handle_and_backup() {
        let tmp = tempdir().unwrap();
        let slots = SlotStore::in_memory().unwrap();
        let backend = LocalFileBackend::with_fs_permissions(slots.clone());
        backend.attach_handle(&tmp.path().join("novel.json")).unwrap();
        backend.save(&sample_project()).await.unwrap();

        backend.forget().await.unwrap();
        assert!(!slots.contains(Slot::ProjectFileHandle).unwrap());
        assert!(!slots.contains(Slot::ProjectBackup).unwrap());
        assert!(backend.load().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saving_keeps_the_permissions_of_an_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        let path = tmp.path().join("shared_novel.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let backend = LocalFileBackend::with_fs_permissions(SlotStore::in_memory().unwrap());
        backend.attach_handle(&path).unwrap();
        backend.save(&sample_project()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert!(std::fs::read_to_string(&path).unwrap().contains("The Long Road"));
        let leftovers = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file should be renamed away");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn new_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        let path = tmp.path().join("fresh.json");
        write_atomically(path.clone(), "{}".into()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn unreadable_handle_is_discarded() {
        let slots = SlotStore::in_memory().unwrap();
        slots.set(Slot::ProjectFileHandle, "not a handle").unwrap();
        let backend = LocalFileBackend::with_fs_permissions(slots.clone());
        assert!(backend.handle().unwrap().is_none());
        assert!(!slots.contains(Slot::ProjectFileHandle).unwrap());
    }
}

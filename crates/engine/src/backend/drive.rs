// Remote-drive backend: one well-known JSON file in the user's drive.
//
// The file id is cached in meta.db. A missing or stale id is never fatal:
// load falls back to a search by name and save recreates the file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use storyverse_common::format::{project_name_from_path, to_pretty_json};
use storyverse_common::types::ProjectData;

use super::{BackendError, BackendKind, LoadedProject, StorageBackend};
use crate::session::SessionProvider;
use crate::store::{Slot, SlotStore};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DriveFileMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub trashed: bool,
}

/// The handful of drive operations the backend needs.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// `None` when the id does not exist.
    async fn get_metadata(&self, token: &str, file_id: &str) -> Result<Option<DriveFileMeta>, BackendError>;

    /// Fails with `NotFound` when the id does not exist.
    async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>, BackendError>;

    /// First non-trashed file with exactly this name.
    async fn find_by_name(&self, token: &str, name: &str) -> Result<Option<DriveFileMeta>, BackendError>;

    /// Fails with `NotFound` when the id does not exist.
    async fn update(&self, token: &str, file_id: &str, body: &[u8]) -> Result<(), BackendError>;

    async fn create(&self, token: &str, name: &str, body: &[u8]) -> Result<DriveFileMeta, BackendError>;
}

pub struct DriveBackend {
    client: Arc<dyn DriveClient>,
    session: Arc<dyn SessionProvider>,
    slots: SlotStore,
    file_name: String,
}

impl DriveBackend {
    pub fn new(
        client: Arc<dyn DriveClient>,
        session: Arc<dyn SessionProvider>,
        slots: SlotStore,
        file_name: impl Into<String>,
    ) -> Self {
        Self { client, session, slots, file_name: file_name.into() }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn cached_file_id(&self) -> Result<Option<String>, BackendError> {
        Ok(self.slots.get(Slot::DriveFileId)?)
    }

    fn cache_file_id(&self, file_id: &str) -> Result<(), BackendError> {
        self.slots.set(Slot::DriveFileId, file_id)?;
        Ok(())
    }

    async fn download_project(&self, token: &str, meta: &DriveFileMeta) -> Result<Option<LoadedProject>, BackendError> {
        let bytes = match self.client.download(token, &meta.id).await {
            Ok(bytes) => bytes,
            Err(BackendError::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            warn!(file_id = %meta.id, "drive project file is empty; treating it as absent");
            return Ok(None);
        }
        let raw = serde_json::from_slice(&bytes)
            .map_err(|error| BackendError::Decode(format!("drive file `{}`: {error}", meta.name)))?;
        Ok(Some(LoadedProject { name: project_name_from_path(Path::new(&meta.name)), raw }))
    }

    /// Cached id if it still resolves to a live file.
    async fn live_cached_file(&self, token: &str) -> Result<Option<DriveFileMeta>, BackendError> {
        let Some(file_id) = self.cached_file_id()? else {
            return Ok(None);
        };
        match self.client.get_metadata(token, &file_id).await? {
            Some(meta) if !meta.trashed => Ok(Some(meta)),
            _ => {
                debug!(file_id = %file_id, "cached drive file id is stale");
                Ok(None)
            }
        }
    }

    async fn create_file(&self, token: &str, body: &[u8]) -> Result<(), BackendError> {
        let meta = self.client.create(token, &self.file_name, body).await?;
        info!(file_id = %meta.id, name = %meta.name, "created project file in drive");
        self.cache_file_id(&meta.id)
    }
}

#[async_trait]
impl StorageBackend for DriveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Drive
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.session.access_token().await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn load(&self) -> Result<Option<LoadedProject>, BackendError> {
        let token = self.session.access_token().await?;

        if let Some(meta) = self.live_cached_file(&token).await? {
            if let Some(loaded) = self.download_project(&token, &meta).await? {
                return Ok(Some(loaded));
            }
        }

        match self.client.find_by_name(&token, &self.file_name).await? {
            Some(meta) => {
                debug!(file_id = %meta.id, "found project file by name");
                self.cache_file_id(&meta.id)?;
                self.download_project(&token, &meta).await
            }
            None => {
                self.slots.delete(Slot::DriveFileId)?;
                Ok(None)
            }
        }
    }

    async fn save(&self, project: &ProjectData) -> Result<(), BackendError> {
        let token = self.session.access_token().await?;
        let body = to_pretty_json(project).into_bytes();

        let file_id = match self.cached_file_id()? {
            Some(file_id) => Some(file_id),
            None => match self.client.find_by_name(&token, &self.file_name).await? {
                Some(meta) => {
                    self.cache_file_id(&meta.id)?;
                    Some(meta.id)
                }
                None => None,
            },
        };

        let Some(file_id) = file_id else {
            return self.create_file(&token, &body).await;
        };
        match self.client.update(&token, &file_id, &body).await {
            Ok(()) => {
                debug!(file_id = %file_id, bytes = body.len(), "updated project file in drive");
                Ok(())
            }
            Err(BackendError::NotFound(_)) => {
                warn!(file_id = %file_id, "drive file vanished; recreating");
                self.create_file(&token, &body).await
            }
            Err(error) => Err(error),
        }
    }

    async fn forget(&self) -> Result<(), BackendError> {
        self.slots.delete(Slot::DriveFileId)?;
        Ok(())
    }
}

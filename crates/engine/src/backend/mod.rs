// Storage backends: interchangeable persistence targets for the whole project.
//
// Both backends persist the full `ProjectData` as pretty-printed JSON and
// re-validate their handle (file permission or access token) before every
// load and save, since either can be revoked out-of-band.

pub mod drive;
pub mod drive_http;
pub mod local;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use storyverse_common::sanitize::sanitize_project;
use storyverse_common::types::ProjectData;

pub use drive::{DriveBackend, DriveClient, DriveFileMeta};
pub use drive_http::HttpDriveClient;
pub use local::{FileHandle, FsPermissionBroker, LocalFileBackend, Permission, PermissionBroker};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Drive,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Drive => "drive",
        }
    }
}

/// A persisted document as read back from a backend, before sanitizing.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProject {
    pub name: String,
    pub raw: Value,
}

impl LoadedProject {
    /// Run the untrusted payload through the sanitizer.
    pub fn into_project(self) -> Result<(String, ProjectData), BackendError> {
        let project =
            sanitize_project(&self.raw).map_err(|error| BackendError::Decode(error.to_string()))?;
        Ok((self.name, project))
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("permission to `{}` was denied", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("remote file `{0}` was not found")]
    NotFound(String),

    #[error("not signed in to the drive")]
    Unauthorized,

    #[error("action cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("drive request failed with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("drive transport error: {0}")]
    Transport(String),

    #[error("stored project is unreadable: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Coarse classification used for save status reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The user must re-grant access to the local file.
    Permission,
    /// The user must sign in again.
    Unauthorized,
    Cancelled,
    /// Worth retrying on the next debounce or flush.
    Transient,
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PermissionDenied { .. } => FailureKind::Permission,
            Self::Unauthorized => FailureKind::Unauthorized,
            Self::Cancelled => FailureKind::Cancelled,
            Self::NotFound(_)
            | Self::Io(_)
            | Self::Remote { .. }
            | Self::Transport(_)
            | Self::Decode(_)
            | Self::Store(_) => FailureKind::Transient,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Contract shared by the local-file and remote-drive backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Acquire (or re-validate) the underlying handle.
    async fn connect(&self) -> Result<(), BackendError>;

    /// Release the handle. Persisted identity is kept.
    async fn disconnect(&self) -> Result<(), BackendError>;

    /// The persisted document, or `None` when nothing exists yet.
    async fn load(&self) -> Result<Option<LoadedProject>, BackendError>;

    /// Persist the full document, creating the resource on first use.
    async fn save(&self, project: &ProjectData) -> Result<(), BackendError>;

    /// Delete the persisted identity (handle, backup, cached id).
    async fn forget(&self) -> Result<(), BackendError>;
}

/// The backend the engine currently writes to.
///
/// `None` is a real state: no project open, or persistence withheld while
/// a drive conflict is unresolved.
#[derive(Clone, Default)]
pub enum ActiveBackend {
    #[default]
    None,
    Local(Arc<LocalFileBackend>),
    Drive(Arc<DriveBackend>),
}

impl ActiveBackend {
    pub fn kind(&self) -> Option<BackendKind> {
        match self {
            Self::None => None,
            Self::Local(_) => Some(BackendKind::Local),
            Self::Drive(_) => Some(BackendKind::Drive),
        }
    }

    pub fn storage(&self) -> Option<Arc<dyn StorageBackend>> {
        match self {
            Self::None => None,
            Self::Local(backend) => Some(backend.clone() as Arc<dyn StorageBackend>),
            Self::Drive(backend) => Some(backend.clone() as Arc<dyn StorageBackend>),
        }
    }
}

impl std::fmt::Debug for ActiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "ActiveBackend::{}", kind.as_str()),
            None => write!(f, "ActiveBackend::None"),
        }
    }
}

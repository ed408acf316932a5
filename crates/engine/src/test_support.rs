// In-memory doubles for the drive API and the session layer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use storyverse_common::format::{parse_project, to_pretty_json};
use storyverse_common::types::ProjectData;

use crate::backend::{BackendError, DriveClient, DriveFileMeta};
use crate::session::{AuthTokens, Session, SessionProvider};

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    body: Vec<u8>,
    trashed: bool,
}

/// A drive with optional latency and injectable write failures.
#[derive(Default)]
pub(crate) struct MemoryDrive {
    files: Mutex<BTreeMap<String, StoredFile>>,
    next_id: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    searches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryDrive {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        let drive = Self::default();
        *drive.delay.lock().unwrap() = Some(delay);
        drive
    }

    pub(crate) fn insert(&self, name: &str, project: &ProjectData) -> String {
        self.insert_bytes(name, to_pretty_json(project).as_bytes())
    }

    pub(crate) fn insert_bytes(&self, name: &str, body: &[u8]) -> String {
        let id = self.allocate_id();
        self.files
            .lock()
            .unwrap()
            .insert(id.clone(), StoredFile { name: name.to_string(), body: body.to_vec(), trashed: false });
        id
    }

    pub(crate) fn remove(&self, id: &str) {
        self.files.lock().unwrap().remove(id);
    }

    pub(crate) fn trash(&self, id: &str) {
        if let Some(file) = self.files.lock().unwrap().get_mut(id) {
            file.trashed = true;
        }
    }

    pub(crate) fn file_count(&self) -> usize {
        self.files.lock().unwrap().values().filter(|file| !file.trashed).count()
    }

    /// The single live file, parsed.
    pub(crate) fn only_project(&self) -> Option<ProjectData> {
        let files = self.files.lock().unwrap();
        let mut live = files.values().filter(|file| !file.trashed);
        let file = live.next()?;
        assert!(live.next().is_none(), "expected exactly one live file");
        parse_project(&file.body).ok()
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Completed update and create calls.
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn find_by_name_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> String {
        format!("file-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn begin_write(&self) -> Result<(), BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Remote { status: 503, message: "backend unavailable".into() });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DriveClient for MemoryDrive {
    async fn get_metadata(&self, _token: &str, file_id: &str) -> Result<Option<DriveFileMeta>, BackendError> {
        Ok(self.files.lock().unwrap().get(file_id).map(|file| DriveFileMeta {
            id: file_id.to_string(),
            name: file.name.clone(),
            trashed: file.trashed,
        }))
    }

    async fn download(&self, _token: &str, file_id: &str) -> Result<Vec<u8>, BackendError> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .map(|file| file.body.clone())
            .ok_or_else(|| BackendError::NotFound(file_id.to_string()))
    }

    async fn find_by_name(&self, _token: &str, name: &str) -> Result<Option<DriveFileMeta>, BackendError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|(_, file)| file.name == name && !file.trashed)
            .map(|(id, file)| DriveFileMeta { id: id.clone(), name: file.name.clone(), trashed: false }))
    }

    async fn update(&self, _token: &str, file_id: &str, body: &[u8]) -> Result<(), BackendError> {
        if !self.files.lock().unwrap().contains_key(file_id) {
            return Err(BackendError::NotFound(file_id.to_string()));
        }
        self.begin_write().await?;
        match self.files.lock().unwrap().get_mut(file_id) {
            Some(file) => {
                file.body = body.to_vec();
                Ok(())
            }
            None => Err(BackendError::NotFound(file_id.to_string())),
        }
    }

    async fn create(&self, _token: &str, name: &str, body: &[u8]) -> Result<DriveFileMeta, BackendError> {
        self.begin_write().await?;
        let id = self.allocate_id();
        self.files
            .lock()
            .unwrap()
            .insert(id.clone(), StoredFile { name: name.to_string(), body: body.to_vec(), trashed: false });
        Ok(DriveFileMeta { id, name: name.to_string(), trashed: false })
    }
}

/// A session that is either always valid or always absent.
pub(crate) struct StaticSession {
    signed_in: AtomicBool,
    fail_restore: AtomicBool,
    token_requests: AtomicUsize,
    sign_outs: AtomicUsize,
}

impl StaticSession {
    pub(crate) fn signed_in() -> Self {
        Self {
            signed_in: AtomicBool::new(true),
            fail_restore: AtomicBool::new(false),
            token_requests: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn signed_out() -> Self {
        let session = Self::signed_in();
        session.signed_in.store(false, Ordering::SeqCst);
        session
    }

    pub(crate) fn is_signed_in(&self) -> bool {
        self.signed_in.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn restore_session(&self) -> Result<Option<Session>, BackendError> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("identity provider unreachable".into()));
        }
        Ok(self.is_signed_in().then_some(Session { expires_at: None }))
    }

    async fn access_token(&self) -> Result<String, BackendError> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        if self.is_signed_in() {
            Ok("token".into())
        } else {
            Err(BackendError::Unauthorized)
        }
    }

    async fn sign_in(&self, _tokens: AuthTokens) -> Result<(), BackendError> {
        self.signed_in.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.signed_in.store(false, Ordering::SeqCst);
        Ok(())
    }
}

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::tempdir;

use storyverse_common::format::parse_project;
use storyverse_engine::backend::{
    DriveBackend, FileHandle, FailureKind, HttpDriveClient, LocalFileBackend, Permission,
    PermissionBroker,
};
use storyverse_engine::config::{DriveConfig, SaveConfig};
use storyverse_engine::engine::SaveStatus;
use storyverse_engine::security::MemorySecretStore;
use storyverse_engine::session::SessionManager;
use storyverse_engine::store::meta_db::MetaDb;
use storyverse_engine::store::SlotStore;
use storyverse_engine::{AppState, PersistenceEngine, Reconciler};

/// Grants access until `revoke` is called, like a browser permission prompt
/// the user later dismisses.
#[derive(Default)]
struct RevocableBroker {
    revoked: AtomicBool,
}

impl RevocableBroker {
    fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    fn grant(&self) {
        self.revoked.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionBroker for RevocableBroker {
    async fn query(&self, _handle: &FileHandle) -> Permission {
        if self.revoked.load(Ordering::SeqCst) {
            Permission::Denied
        } else {
            Permission::Granted
        }
    }

    async fn request(&self, handle: &FileHandle) -> Permission {
        self.query(handle).await
    }
}

fn save_config() -> SaveConfig {
    SaveConfig { debounce_ms: 100, saved_display_ms: 200, flush_poll_ms: 10 }
}

/// A signed-out reconciler whose meta store lives in `meta_db`.
fn open_reconciler(meta_db: &Path, broker: Arc<RevocableBroker>) -> Reconciler {
    let slots = SlotStore::new(MetaDb::open(meta_db).expect("meta db should open"));
    let session = Arc::new(SessionManager::new(Arc::new(MemorySecretStore::default()), None));
    let local = Arc::new(LocalFileBackend::new(slots.clone(), broker));
    let drive = Arc::new(DriveBackend::new(
        Arc::new(HttpDriveClient::new(&DriveConfig::default())),
        session.clone(),
        slots,
        storyverse_common::format::DEFAULT_PROJECT_FILE_NAME.to_string(),
    ));
    Reconciler::new(PersistenceEngine::new(save_config()), local, drive, session)
}

async fn wait_for_status(engine: &PersistenceEngine, wanted: SaveStatus) {
    let mut rx = engine.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *rx.borrow_and_update() != wanted {
            rx.changed().await.expect("engine should stay alive");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("engine never reached {wanted:?}"));
}

fn read_file(path: &Path) -> storyverse_common::types::ProjectData {
    let bytes = std::fs::read(path).expect("project file should exist");
    parse_project(&bytes).expect("project file should parse")
}

#[tokio::test]
async fn edits_are_debounced_to_disk_and_survive_a_restart() {
    let tmp = tempdir().expect("tempdir should be created");
    let meta_db = tmp.path().join("meta.db");
    let file = tmp.path().join("my_saga.json");
    let broker = Arc::new(RevocableBroker::default());

    let novel_id = {
        let mut reconciler = open_reconciler(&meta_db, broker.clone());
        assert_eq!(reconciler.startup().await, &AppState::Welcome { message: None });

        reconciler.new_local_project("My Saga", Some(&file)).await.expect("project should be created");
        assert!(file.is_file(), "new project should be written immediately");

        let engine = reconciler.engine().clone();
        let novel_id = engine
            .edit(|project| project.add_novel("Book One", "", Utc::now()))
            .expect("document should be loaded");
        assert!(engine.is_dirty());

        wait_for_status(&engine, SaveStatus::Saved).await;
        assert!(!engine.is_dirty());
        assert_eq!(read_file(&file).novels.len(), 1);

        wait_for_status(&engine, SaveStatus::Idle).await;
        engine.shutdown();
        novel_id
    };

    let mut reconciler = open_reconciler(&meta_db, broker);
    assert_eq!(
        reconciler.startup().await,
        &AppState::Ready { backend: storyverse_engine::backend::BackendKind::Local }
    );
    let engine = reconciler.engine();
    assert_eq!(engine.project_name().as_deref(), Some("my saga"));
    let snapshot = engine.snapshot().expect("project should be live");
    assert_eq!(snapshot.novel(&novel_id).map(|novel| novel.title.as_str()), Some("Book One"));
    assert_eq!(engine.status(), SaveStatus::Idle);
}

#[tokio::test]
async fn revoked_permission_surfaces_as_error_and_recovers_once_granted() {
    let tmp = tempdir().expect("tempdir should be created");
    let file = tmp.path().join("saga.json");
    let broker = Arc::new(RevocableBroker::default());
    let mut reconciler = open_reconciler(&tmp.path().join("meta.db"), broker.clone());
    reconciler.new_local_project("Saga", Some(&file)).await.expect("project should be created");

    broker.revoke();
    let engine = reconciler.engine().clone();
    engine.edit(|project| project.add_story_idea("Lighthouse", "", Utc::now()));

    let failure = engine.flush().await.expect_err("write should be refused");
    assert_eq!(failure.kind, FailureKind::Permission);
    assert_eq!(engine.status(), SaveStatus::Error);
    assert!(engine.is_dirty());
    assert!(engine.should_warn_before_unload());
    assert!(read_file(&file).story_ideas.is_empty());

    broker.grant();
    engine.flush().await.expect("write should succeed once permission is back");
    assert!(!engine.is_dirty());
    assert_eq!(read_file(&file).story_ideas.len(), 1);
    assert!(engine.last_error().is_none());
}

#[tokio::test]
async fn missing_project_file_falls_back_to_the_backup_on_startup() {
    let tmp = tempdir().expect("tempdir should be created");
    let meta_db = tmp.path().join("meta.db");
    let file = tmp.path().join("saga.json");
    let broker = Arc::new(RevocableBroker::default());

    {
        let mut reconciler = open_reconciler(&meta_db, broker.clone());
        reconciler.new_local_project("Saga", Some(&file)).await.expect("project should be created");
        let engine = reconciler.engine().clone();
        engine.edit(|project| project.add_novel("Kept", "", Utc::now()));
        engine.flush().await.expect("flush should succeed");
        engine.shutdown();
    }
    std::fs::remove_file(&file).expect("project file should be removable");

    let mut reconciler = open_reconciler(&meta_db, broker);
    assert!(matches!(reconciler.startup().await, AppState::Ready { .. }));
    let snapshot = reconciler.engine().snapshot().expect("backup should be loaded");
    assert_eq!(snapshot.novels.len(), 1);
    assert_eq!(snapshot.novels[0].title, "Kept");
}

#[tokio::test]
async fn import_sanitizes_and_export_round_trips_through_a_file() {
    let tmp = tempdir().expect("tempdir should be created");
    let broker = Arc::new(RevocableBroker::default());
    let mut reconciler = open_reconciler(&tmp.path().join("meta.db"), broker);

    let source = tmp.path().join("old_draft.json");
    std::fs::write(
        &source,
        r#"{"novels":[{"title":"Salvaged","chapters":[{"title":"One","content":"<p>three small words</p>"}]}],"stray":true}"#,
    )
    .expect("source should be written");

    let state = reconciler.import_file(Some(&source), None).await.expect("import should succeed");
    assert!(matches!(state, AppState::Ready { .. }));
    let engine = reconciler.engine().clone();
    assert_eq!(engine.project_name().as_deref(), Some("old draft"));
    let snapshot = engine.snapshot().expect("imported project should be live");
    assert_eq!(snapshot.novels[0].chapters[0].word_count, 3);
    assert!(!snapshot.novels[0].id.is_empty());

    let export = tmp.path().join("export.json");
    engine.download_backup(&export).await.expect("export should succeed");
    assert_eq!(&read_file(&export), snapshot.as_ref());

    reconciler.close_project().await.expect("close should succeed");
    assert_eq!(reconciler.state(), &AppState::Welcome { message: None });
    assert!(reconciler.engine().snapshot().is_none());
}

// Wiring: build the engine, backends, session and reconciler from config.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::backend::{DriveBackend, DriveClient, HttpDriveClient, LocalFileBackend};
use crate::config::EngineConfig;
use crate::engine::PersistenceEngine;
use crate::reconcile::Reconciler;
use crate::security::{KeyringSecretStore, MemorySecretStore, SecretStore};
use crate::session::{HttpTokenEndpoint, SessionManager, SessionProvider, TokenEndpoint};
use crate::store::meta_db::MetaDb;
use crate::store::SlotStore;

/// Where the small persisted state lives.
pub enum StateLocation {
    /// `meta.db` under the configured data directory, tokens in the keychain.
    Persistent,
    /// In-memory store and secrets; nothing survives the process.
    Ephemeral,
}

pub struct Runtime {
    pub config: EngineConfig,
    pub slots: SlotStore,
    pub session: Arc<SessionManager>,
    pub reconciler: Reconciler,
}

impl Runtime {
    pub fn open(config: EngineConfig, location: StateLocation) -> Result<Self> {
        let drive_client: Arc<dyn DriveClient> = Arc::new(HttpDriveClient::new(&config.drive));
        Self::with_drive_client(config, location, drive_client)
    }

    pub fn with_drive_client(
        config: EngineConfig,
        location: StateLocation,
        drive_client: Arc<dyn DriveClient>,
    ) -> Result<Self> {
        let (slots, secrets): (SlotStore, Arc<dyn SecretStore>) = match location {
            StateLocation::Persistent => {
                let path = config.meta_db_path().context("could not resolve a home directory")?;
                info!(path = %path.display(), "opening meta store");
                (SlotStore::new(MetaDb::open(&path)?), Arc::new(KeyringSecretStore))
            }
            StateLocation::Ephemeral => (SlotStore::in_memory()?, Arc::new(MemorySecretStore::default())),
        };

        let endpoint = HttpTokenEndpoint::from_config(&config.drive)
            .map(|endpoint| Arc::new(endpoint) as Arc<dyn TokenEndpoint>);
        let session = Arc::new(SessionManager::new(secrets, endpoint));
        let provider: Arc<dyn SessionProvider> = session.clone();

        let local = Arc::new(LocalFileBackend::with_fs_permissions(slots.clone()));
        let drive = Arc::new(DriveBackend::new(
            drive_client,
            provider.clone(),
            slots.clone(),
            config.drive.file_name.clone(),
        ));
        let engine = PersistenceEngine::new(config.save.clone());
        let reconciler = Reconciler::new(engine, local, drive, provider);

        Ok(Self { config, slots, session, reconciler })
    }

    pub fn engine(&self) -> &PersistenceEngine {
        self.reconciler.engine()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::reconcile::AppState;
    use crate::store::Slot;
    use crate::test_support::MemoryDrive;

    #[tokio::test]
    async fn ephemeral_runtime_starts_on_welcome() {
        let mut runtime = Runtime::with_drive_client(
            EngineConfig::default(),
            StateLocation::Ephemeral,
            Arc::new(MemoryDrive::default()),
        )
        .unwrap();
        assert_eq!(runtime.reconciler.startup().await, &AppState::Welcome { message: None });
    }

    #[tokio::test]
    async fn persistent_runtime_remembers_the_project_file() {
        let tmp = tempdir().unwrap();
        let config = EngineConfig { data_dir: Some(tmp.path().join("data")), ..EngineConfig::default() };
        let file = tmp.path().join("saga.json");
        {
            let mut runtime = Runtime::with_drive_client(
                config.clone(),
                StateLocation::Persistent,
                Arc::new(MemoryDrive::default()),
            )
            .unwrap();
            runtime.reconciler.new_local_project("Saga", Some(&file)).await.unwrap();
            assert!(runtime.slots.contains(Slot::ProjectFileHandle).unwrap());
        }
        assert!(tmp.path().join("data").join("meta.db").exists());

        let slots = SlotStore::new(MetaDb::open(config.meta_db_path().unwrap()).unwrap());
        assert!(slots.get(Slot::ProjectFileHandle).unwrap().unwrap().contains("saga.json"));
    }
}

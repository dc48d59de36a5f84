//! Process Context
//!
//! Owns the store, the sync service and the diagnostics engine for one
//! process. Collaborators are built explicitly from [`AppConfig`]; tests
//! inject their own with [`AppContext::with_parts`].

use crate::diagnostics::DiagnosticsEngine;
use crate::shared::config::AppConfig;
use crate::shared::error::StoreError;
use crate::store::LocalDatabase;
use crate::sync::http::HttpRemote;
use crate::sync::{OfflineRemote, RemoteClient, SyncService, SyncSettings};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub db: Arc<LocalDatabase>,
    pub sync: SyncService,
    pub diagnostics: DiagnosticsEngine,
}

impl AppContext {
    /// Open the snapshot at the configured path and wire the remote.
    /// Without a remote URL every sync fails as a transport error.
    pub async fn init(config: AppConfig) -> Result<Self, StoreError> {
        let path = config.resolved_data_path();
        tracing::info!("Opening local store at {}", path.display());
        let db = Arc::new(LocalDatabase::open(&path).await?);

        let remote: Arc<dyn RemoteClient> = match HttpRemote::from_config(&config) {
            Some(remote) => Arc::new(remote),
            None => {
                tracing::warn!("No remote URL configured; running offline");
                Arc::new(OfflineRemote)
            }
        };
        Ok(Self::with_parts(config, db, remote))
    }

    pub fn with_parts(
        config: AppConfig,
        db: Arc<LocalDatabase>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        let sync = SyncService::new(Arc::clone(&db), remote, SyncSettings::from(&config));
        let diagnostics = DiagnosticsEngine::from_config(Arc::clone(&db), &config);
        Self {
            config,
            db,
            sync,
            diagnostics,
        }
    }

    /// Stop polling, wait for a running cycle and persist the store
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.sync.shutdown().await;
        self.db.flush().await?;
        tracing::info!("Shutdown complete");
        Ok(())
    }
}

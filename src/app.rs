//! Wiring: build every component from one [`Config`].
//!
//! [`App::open`] initializes the repository (which may bootstrap from the
//! remote), opens the semantic index, and constructs the store. Background
//! activities are opt-in through [`App::start_background`] and are stopped
//! by [`App::shutdown`], which is safe to call more than once.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::index::{NoopIndex, SemanticIndex, VectorIndex};
use crate::reconciler::IndexReconciler;
use crate::retrieval::RetrievalParams;
use crate::store::{EntityStore, StoreOptions};
use crate::sync::{BackgroundSync, SyncManager};

const INDEX_FILE: &str = "index.json";

pub struct App {
    config: Config,
    store: Arc<EntityStore>,
    sync: Arc<SyncManager>,
    index: Arc<dyn SemanticIndex>,
    background: Option<BackgroundSync>,
    reconciler: IndexReconciler,
}

impl App {
    pub async fn open(config: &Config) -> Result<Self> {
        let sync = Arc::new(SyncManager::from_config(config));
        sync.init().await?;

        let index = open_index(config).await?;

        let options = StoreOptions {
            auto_index: config.index.auto_index,
            auto_commit: config.git.auto_commit,
            retrieval: RetrievalParams::from(&config.retrieval),
        };
        let store = Arc::new(
            EntityStore::new(config.entities_dir(), Arc::clone(&index), options)
                .with_sync(Arc::clone(&sync)),
        );

        // A fresh or discarded snapshot starts empty: fill it from disk.
        if config.index.auto_index && config.embedding.is_enabled() {
            let stats = index.stats().await?;
            if stats.count == 0 {
                match store.reindex().await {
                    Ok(n) if n > 0 => tracing::info!(entities = n, "built semantic index"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "initial index build failed"),
                }
            }
        }

        let background = config
            .remote
            .as_ref()
            .filter(|r| r.auto_sync)
            .map(|r| BackgroundSync::new(Arc::clone(&sync), r.sync_interval()));
        let reconciler = IndexReconciler::new(config.entities_dir(), Arc::clone(&index));

        Ok(Self {
            config: config.clone(),
            store,
            sync,
            index,
            background,
            reconciler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn index(&self) -> &Arc<dyn SemanticIndex> {
        &self.index
    }

    /// Start the background pull timer (remote with auto-sync only) and the
    /// index reconciler (auto-index only).
    pub fn start_background(&self) -> Result<()> {
        if let Some(ref background) = self.background {
            background.start();
        }
        if self.config.index.auto_index {
            self.reconciler.start()?;
        }
        Ok(())
    }

    pub fn is_background_running(&self) -> bool {
        self.reconciler.is_running()
            || self
                .background
                .as_ref()
                .map(|b| b.is_running())
                .unwrap_or(false)
    }

    /// Stop every background activity. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(ref background) = self.background {
            background.stop().await;
        }
        self.reconciler.stop().await;
    }
}

async fn open_index(config: &Config) -> Result<Arc<dyn SemanticIndex>> {
    match create_provider(&config.embedding)? {
        Some(provider) => {
            let path = config.internal_dir().join(INDEX_FILE);
            let index = VectorIndex::open(provider, path).await?;
            Ok(Arc::new(index))
        }
        None => Ok(Arc::new(NoopIndex)),
    }
}

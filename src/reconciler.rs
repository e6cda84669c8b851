//! Keep the semantic index in step with edits made outside the store.
//!
//! A recursive [`notify`] watcher over the entities directory feeds an
//! unbounded channel; a tokio task classifies each event and applies it:
//!
//! | Event | Action |
//! |-------|--------|
//! | create, rename (to) | parse file, `index.add` |
//! | modify | parse file, `index.update` |
//! | remove, rename (from) | log only |
//!
//! Unlinks never touch the index; stale entries are purged by a reindex.
//! Dot-prefixed paths and non-markdown files are ignored. Every failure is
//! logged and the watcher keeps running.

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::frontmatter;
use crate::index::SemanticIndex;
use crate::store::{is_hidden, is_markdown};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Add(PathBuf),
    Update(PathBuf),
    Unlink(PathBuf),
}

struct Running {
    _watcher: RecommendedWatcher,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct IndexReconciler {
    root: PathBuf,
    index: Arc<dyn SemanticIndex>,
    running: Mutex<Option<Running>>,
}

impl IndexReconciler {
    pub fn new(root: impl Into<PathBuf>, index: Arc<dyn SemanticIndex>) -> Self {
        Self {
            root: root.into(),
            index,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Begin watching. A second call while running does nothing.
    pub fn start(&self) -> Result<()> {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create entities directory: {}", self.root.display()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let root = self.root.clone();
        let index = Arc::clone(&self.index);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            Ok(event) => {
                                for action in classify(&root, &event) {
                                    apply(index.as_ref(), &action).await;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "file watcher error"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *running = Some(Running {
            _watcher: watcher,
            shutdown,
            task,
        });
        tracing::info!(root = %self.root.display(), "index reconciler started");
        Ok(())
    }

    /// Stop watching and wait for the event task. Idempotent.
    pub async fn stop(&self) {
        let taken = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(running) = taken {
            let _ = running.shutdown.send(true);
            drop(running._watcher);
            let _ = running.task.await;
            tracing::info!("index reconciler stopped");
        }
    }
}

/// Map a raw watcher event to index actions for entity files under `root`.
pub fn classify(root: &Path, event: &Event) -> Vec<ReconcileAction> {
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| is_entity_path(root, p))
            .map(|p| ReconcileAction::Add(p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => {
            let mut actions = Vec::new();
            match mode {
                RenameMode::From => {
                    actions.extend(
                        event
                            .paths
                            .iter()
                            .filter(|p| is_entity_path(root, p))
                            .cloned()
                            .map(ReconcileAction::Unlink),
                    );
                }
                RenameMode::To => {
                    actions.extend(
                        event
                            .paths
                            .iter()
                            .filter(|p| is_entity_path(root, p))
                            .cloned()
                            .map(ReconcileAction::Add),
                    );
                }
                RenameMode::Both => {
                    if let Some(from) = event.paths.first().filter(|p| is_entity_path(root, p)) {
                        actions.push(ReconcileAction::Unlink(from.clone()));
                    }
                    if let Some(to) = event.paths.get(1).filter(|p| is_entity_path(root, p)) {
                        actions.push(ReconcileAction::Add(to.clone()));
                    }
                }
                _ => {
                    for p in event.paths.iter().filter(|p| is_entity_path(root, p)) {
                        if p.exists() {
                            actions.push(ReconcileAction::Add(p.clone()));
                        } else {
                            actions.push(ReconcileAction::Unlink(p.clone()));
                        }
                    }
                }
            }
            actions
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| is_entity_path(root, p))
            .map(|p| ReconcileAction::Update(p.clone()))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter(|p| is_entity_path(root, p))
            .map(|p| ReconcileAction::Unlink(p.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Apply one action to the index. Failures are logged, never returned.
pub async fn apply(index: &dyn SemanticIndex, action: &ReconcileAction) {
    match action {
        ReconcileAction::Add(path) | ReconcileAction::Update(path) => {
            let entity = match frontmatter::read_entity(path).await {
                Ok(Ok(entity)) => entity,
                Ok(Err(e)) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable entity file");
                    return;
                }
                Err(e) => {
                    // Usually a file that vanished between the event and the read.
                    tracing::debug!(path = %path.display(), error = %e, "entity file unreadable");
                    return;
                }
            };
            let result = if matches!(action, ReconcileAction::Add(_)) {
                index.add(&entity).await
            } else {
                index.update(&entity).await
            };
            match result {
                Ok(()) => tracing::debug!(id = %entity.id_prefix(), "reconciled entity into index"),
                Err(e) => tracing::warn!(id = %entity.id_prefix(), error = %e, "index reconcile failed"),
            }
        }
        ReconcileAction::Unlink(path) => {
            tracing::info!(
                id = %filename_prefix(path),
                "entity file removed outside the store; index entry kept until reindex"
            );
        }
    }
}

fn is_entity_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    if relative.components().any(|c| is_hidden(c.as_os_str())) {
        return false;
    }
    is_markdown(path)
}

/// The id prefix embedded in `<slug>-<prefix>.md`.
fn filename_prefix(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match stem.rsplit_once('-') {
        Some((_, prefix)) => prefix.to_string(),
        None => stem,
    }
}

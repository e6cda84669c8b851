//! Entity store: authoritative CRUD over the markdown file tree.
//!
//! The file tree is the source of truth. Each mutation runs, in order:
//!
//! 1. write (or remove) the entity file; errors propagate.
//! 2. best-effort semantic index update; errors are logged.
//! 3. optional stage + commit through the [`SyncManager`]; errors propagate.
//!
//! Files live at `<entities>/<type>/<slug(title)>-<id[..8]>.md`. The path is
//! fixed at creation; later title or type edits rewrite the file in place.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::frontmatter;
use crate::index::{IndexStats, SemanticIndex};
use crate::models::{id_prefix, now, Entity, EntityPatch, ListFilter, Metadata, NewEntity, SearchResult};
use crate::retrieval::{self, RetrievalParams, SearchOptions};
use crate::scorer;
use crate::sync::SyncManager;

const MAX_SLUG_LEN: usize = 50;

/// Behaviour switches, injected at construction.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Push writes into the semantic index.
    pub auto_index: bool,
    /// Commit every mutation (requires a [`SyncManager`]).
    pub auto_commit: bool,
    pub retrieval: RetrievalParams,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto_index: true,
            auto_commit: true,
            retrieval: RetrievalParams::default(),
        }
    }
}

pub struct EntityStore {
    root: PathBuf,
    index: Arc<dyn SemanticIndex>,
    sync: Option<Arc<SyncManager>>,
    options: StoreOptions,
}

impl EntityStore {
    /// Store over the entity tree at `root`. Without [`with_sync`](Self::with_sync)
    /// nothing is committed.
    pub fn new(root: impl Into<PathBuf>, index: Arc<dyn SemanticIndex>, options: StoreOptions) -> Self {
        Self {
            root: root.into(),
            index,
            sync: None,
            options,
        }
    }

    pub fn with_sync(mut self, sync: Arc<SyncManager>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &Arc<dyn SemanticIndex> {
        &self.index
    }

    pub async fn create(&self, draft: NewEntity) -> Result<Entity> {
        let id = Uuid::new_v4().to_string();
        let ts = now();
        let entity_type = normalize_type(&draft.entity_type);
        let directory = normalize_type(draft.directory.as_deref().unwrap_or(&entity_type));

        let filename = entity_filename(&draft.title, &id);
        let mut filepath = self.root.clone();
        if !directory.is_empty() {
            filepath.push(&directory);
        }
        filepath.push(filename);

        let entity = Entity {
            metadata: Metadata {
                id,
                title: draft.title,
                entity_type,
                tags: dedup(draft.tags),
                created: ts,
                updated: ts,
                expires: draft.expires,
                relations: draft.relations,
            },
            content: draft.content,
            filepath,
        };

        frontmatter::write_entity(&entity).await?;
        tracing::debug!(id = %entity.id(), path = %entity.filepath.display(), "entity created");

        if self.options.auto_index {
            if let Err(e) = self.index.add(&entity).await {
                tracing::warn!(id = %entity.id(), error = %e, "index add failed");
            }
        }

        self.commit(&format!(
            "feat(memory): add \"{}\" ({})",
            entity.metadata.title,
            entity.id_prefix()
        ))
        .await?;

        Ok(entity)
    }

    /// Find an entity by full id.
    ///
    /// Only files whose name carries the id's 8-character prefix are parsed;
    /// the full id then disambiguates prefix collisions.
    pub async fn read(&self, id: &str) -> Result<Option<Entity>> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        let prefix = id_prefix(id).to_string();

        for path in scan_entity_files(&self.root).await? {
            let matches_prefix = path
                .file_name()
                .map(|n| n.to_string_lossy().contains(&prefix))
                .unwrap_or(false);
            if !matches_prefix {
                continue;
            }
            match frontmatter::read_entity(&path).await? {
                Ok(entity) if entity.metadata.id == id => return Ok(Some(entity)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable entity file")
                }
            }
        }

        Ok(None)
    }

    pub async fn update(&self, id: &str, patch: EntityPatch) -> Result<Option<Entity>> {
        let Some(mut entity) = self.read(id).await? else {
            return Ok(None);
        };

        let meta = &mut entity.metadata;
        if let Some(title) = patch.title {
            meta.title = title;
        }
        if let Some(entity_type) = patch.entity_type {
            meta.entity_type = normalize_type(&entity_type);
        }
        if let Some(tags) = patch.tags {
            meta.tags = dedup(tags);
        }
        if let Some(expires) = patch.expires {
            meta.expires = expires;
        }
        if let Some(relations) = patch.relations {
            meta.relations = relations;
        }
        meta.updated = now().max(meta.updated);
        if let Some(content) = patch.content {
            entity.content = content;
        }

        frontmatter::write_entity(&entity).await?;
        tracing::debug!(id = %entity.id(), "entity updated");

        if self.options.auto_index {
            if let Err(e) = self.index.update(&entity).await {
                tracing::warn!(id = %entity.id(), error = %e, "index update failed");
            }
        }

        self.commit(&format!(
            "chore(memory): update \"{}\" ({})",
            entity.metadata.title,
            entity.id_prefix()
        ))
        .await?;

        Ok(Some(entity))
    }

    /// Remove an entity. `false` when the id is unknown.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(entity) = self.read(id).await? else {
            return Ok(false);
        };

        tokio::fs::remove_file(&entity.filepath)
            .await
            .with_context(|| format!("Failed to remove entity file: {}", entity.filepath.display()))?;
        tracing::debug!(id = %entity.id(), "entity deleted");

        if self.options.auto_index {
            if let Err(e) = self.index.remove(entity.id()).await {
                tracing::warn!(id = %entity.id(), error = %e, "index remove failed");
            }
        }

        self.commit(&format!(
            "chore(memory): delete \"{}\" ({})",
            entity.metadata.title,
            entity.id_prefix()
        ))
        .await?;

        Ok(true)
    }

    /// Every parseable entity matching `filter`, most recently updated first.
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        for path in scan_entity_files(&self.root).await? {
            match frontmatter::read_entity(&path).await? {
                Ok(entity) => {
                    if filter.matches(&entity) {
                        entities.push(entity);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable entity file")
                }
            }
        }

        entities.sort_by(|a, b| {
            b.metadata
                .updated
                .cmp(&a.metadata.updated)
                .then_with(|| a.metadata.id.cmp(&b.metadata.id))
        });
        Ok(entities)
    }

    /// Hybrid search over `list(opts.filter)`.
    ///
    /// Fusion already degrades to text-only when the index errors, so it
    /// returns no error of its own. It runs on a separate task only so that
    /// a panic inside it (a provider or scorer bug) surfaces as a join error,
    /// which falls back to an unranked substring filter.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let params = opts.resolve(self.options.retrieval);
        let corpus = Arc::new(self.list(&opts.filter).await?);

        let index = Arc::clone(&self.index);
        let task_corpus = Arc::clone(&corpus);
        let query_owned = query.to_string();
        let filter = opts.filter.clone();
        let fused = tokio::spawn(async move {
            retrieval::hybrid_search(index.as_ref(), &task_corpus, &query_owned, &filter, params).await
        })
        .await;

        match fused {
            Ok(results) => Ok(results),
            Err(e) => {
                tracing::warn!(error = %e, "hybrid search failed, using substring fallback");
                Ok(scorer::naive_filter(query, &corpus)
                    .into_iter()
                    .take(params.limit)
                    .map(|entity| SearchResult {
                        entity: entity.clone(),
                        score: 0.0,
                        match_type: crate::models::MatchType::Exact,
                    })
                    .collect())
            }
        }
    }

    /// Rebuild the semantic index from the file tree. Returns the entity count.
    ///
    /// This is the only operation that purges index entries for files
    /// removed outside the store.
    pub async fn reindex(&self) -> Result<usize> {
        let entities = self.list(&ListFilter::default()).await?;
        self.index
            .rebuild(&entities)
            .await
            .context("Failed to rebuild semantic index")?;
        Ok(entities.len())
    }

    pub async fn index_stats(&self) -> Result<IndexStats> {
        self.index.stats().await
    }

    async fn commit(&self, message: &str) -> Result<()> {
        if !self.options.auto_commit {
            return Ok(());
        }
        if let Some(ref sync) = self.sync {
            sync.commit(message).await?;
        }
        Ok(())
    }
}

/// All `.md` files under `root`, skipping dot-prefixed entries. Sorted for
/// deterministic scans. A missing root yields an empty list.
pub async fn scan_entity_files(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let walker = WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() && is_markdown(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    })
    .await?
}

pub(crate) fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

pub(crate) fn is_markdown(path: &Path) -> bool {
    path.extension().map(|ext| ext == "md").unwrap_or(false)
}

/// Normalize a type (or directory override) into a relative path:
/// no leading or trailing slash, no `..`, no empty or `.` segments.
pub fn normalize_type(raw: &str) -> String {
    raw.replace('\\', "/")
        .replace("..", "")
        .split('/')
        .map(str::trim)
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercase, runs of non-alphanumerics collapsed to `-`, trimmed, at most
/// 50 characters. `untitled` when nothing survives.
pub fn slugify_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

pub fn entity_filename(title: &str, id: &str) -> String {
    format!("{}-{}.md", slugify_title(title), id_prefix(id))
}

fn dedup(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("/travel/japan/2024/"), "travel/japan/2024");
        assert_eq!(normalize_type("../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_type("work//projects"), "work/projects");
        assert_eq!(normalize_type("a/./b"), "a/b");
        assert_eq!(normalize_type(""), "");
    }

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify_title("Trip to Japan!"), "trip-to-japan");
        assert_eq!(slugify_title("  --Hello,   World--  "), "hello-world");
        assert_eq!(slugify_title("???"), "untitled");
        assert_eq!(slugify_title("Café"), "caf");
        let long = "word ".repeat(30);
        let slug = slugify_title(&long);
        assert!(slug.len() <= 50);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_entity_filename() {
        let name = entity_filename("Trip", "1a2b3c4d-5e6f-4000-8000-000000000000");
        assert_eq!(name, "trip-1a2b3c4d.md");
    }

    #[test]
    fn test_dedup_preserves_order_and_case() {
        let tags = vec!["b".into(), "a".into(), "b".into(), "A".into()];
        assert_eq!(dedup(tags), vec!["b", "a", "A"]);
    }
}

//! Embedding-backed [`SemanticIndex`].
//!
//! Holds one vector per entity behind `std::sync::RwLock`; similarity search
//! is brute-force cosine similarity over all stored vectors, which is plenty
//! for a personal corpus. When opened with a path, the index is persisted as
//! JSON after every mutation so a restarted process does not re-embed.
//!
//! Each entry records a SHA-256 hash of the embedded text; [`rebuild`]
//! reuses vectors whose hash is unchanged.
//!
//! [`rebuild`]: SemanticIndex::rebuild

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::models::Entity;

use super::{IndexStats, SemanticIndex};

const EMBED_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    entity: Entity,
    hash: String,
    vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    model: String,
    dims: usize,
    entries: Vec<StoredVector>,
}

pub struct VectorIndex {
    provider: Arc<dyn EmbeddingProvider>,
    entries: RwLock<HashMap<String, StoredVector>>,
    path: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl VectorIndex {
    /// In-memory index with no persistence.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            entries: RwLock::new(HashMap::new()),
            path: None,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Index persisted at `path`. A snapshot written by a different model
    /// or dimensionality is discarded.
    pub async fn open(provider: Arc<dyn EmbeddingProvider>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = HashMap::new();

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read index snapshot: {}", path.display()))?;
            match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snapshot)
                    if snapshot.model == provider.model_name()
                        && snapshot.dims == provider.dims() =>
                {
                    for entry in snapshot.entries {
                        entries.insert(entry.entity.metadata.id.clone(), entry);
                    }
                }
                Ok(snapshot) => tracing::info!(
                    model = %snapshot.model,
                    "index snapshot built with a different model, starting empty"
                ),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable index snapshot, starting empty"),
            }
        }

        Ok(Self {
            provider,
            entries: RwLock::new(entries),
            path: Some(path),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn upsert(&self, entity: &Entity) -> Result<()> {
        let text = embedding_text(entity);
        let hash = content_hash(&text);

        let unchanged = {
            let entries = self.entries.read().expect("index lock poisoned");
            entries.get(entity.id()).map(|e| e.hash == hash).unwrap_or(false)
        };

        let vector = if unchanged {
            None
        } else {
            Some(embed_query(self.provider.as_ref(), &text).await?)
        };

        {
            let mut entries = self.entries.write().expect("index lock poisoned");
            match vector {
                Some(vector) => {
                    entries.insert(
                        entity.id().to_string(),
                        StoredVector {
                            entity: entity.clone(),
                            hash,
                            vector,
                        },
                    );
                }
                None => {
                    if let Some(existing) = entries.get_mut(entity.id()) {
                        existing.entity = entity.clone();
                    }
                }
            }
        }

        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let raw = {
            let entries = self.entries.read().expect("index lock poisoned");
            let mut list: Vec<StoredVector> = entries.values().cloned().collect();
            list.sort_by(|a, b| a.entity.metadata.id.cmp(&b.entity.metadata.id));
            serde_json::to_string(&Snapshot {
                model: self.provider.model_name().to_string(),
                dims: self.provider.dims(),
                entries: list,
            })?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("Failed to write index snapshot: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SemanticIndex for VectorIndex {
    async fn add(&self, entity: &Entity) -> Result<()> {
        self.upsert(entity).await
    }

    async fn update(&self, entity: &Entity) -> Result<()> {
        self.upsert(entity).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let removed = self
            .entries
            .write()
            .expect("index lock poisoned")
            .remove(id)
            .is_some();
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn search_similar(&self, query: &str, k: usize) -> Result<Vec<(Entity, f64)>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.provider.as_ref(), query).await?;

        let mut hits: Vec<(Entity, f64)> = {
            let entries = self.entries.read().expect("index lock poisoned");
            entries
                .values()
                .map(|e| {
                    let sim = cosine_similarity(&query_vec, &e.vector) as f64;
                    (e.entity.clone(), sim.clamp(0.0, 1.0))
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.metadata.id.cmp(&b.0.metadata.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn rebuild(&self, entities: &[Entity]) -> Result<()> {
        let previous: HashMap<String, StoredVector> = self
            .entries
            .read()
            .expect("index lock poisoned")
            .clone();

        let mut next = HashMap::with_capacity(entities.len());
        let mut pending: Vec<(&Entity, String, String)> = Vec::new();

        for entity in entities {
            let text = embedding_text(entity);
            let hash = content_hash(&text);
            match previous.get(entity.id()) {
                Some(prev) if prev.hash == hash => {
                    next.insert(
                        entity.id().to_string(),
                        StoredVector {
                            entity: entity.clone(),
                            hash,
                            vector: prev.vector.clone(),
                        },
                    );
                }
                _ => pending.push((entity, text, hash)),
            }
        }

        let reused = next.len();
        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text, _)| text.clone()).collect();
            let vectors = self.provider.embed(&texts).await?;
            if vectors.len() != batch.len() {
                anyhow::bail!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }
            for ((entity, _, hash), vector) in batch.iter().zip(vectors) {
                next.insert(
                    entity.id().to_string(),
                    StoredVector {
                        entity: (*entity).clone(),
                        hash: hash.clone(),
                        vector,
                    },
                );
            }
        }

        tracing::info!(
            entities = entities.len(),
            reused,
            embedded = pending.len(),
            "semantic index rebuilt"
        );

        *self.entries.write().expect("index lock poisoned") = next;
        self.persist().await
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            count: self.entries.read().expect("index lock poisoned").len(),
        })
    }
}

fn embedding_text(entity: &Entity) -> String {
    format!(
        "{}\n{}\n\n{}",
        entity.metadata.title,
        entity.metadata.tags.join(", "),
        entity.content
    )
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

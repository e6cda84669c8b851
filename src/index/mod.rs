//! Semantic index capability.
//!
//! The [`SemanticIndex`] trait is the only surface the store, the
//! retrieval engine, and the reconciler see. Backends are pluggable:
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`NoopIndex`] | Index disabled, and the default test double |
//! | [`VectorIndex`] | Embedding provider + brute-force cosine similarity |
//!
//! Implementations must be `Send + Sync`; they are shared behind an
//! `Arc<dyn SemanticIndex>` between foreground calls and the reconciler.
//! Every caller treats index failures as soft: the file tree stays
//! authoritative.

pub mod vector;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::Entity;

pub use vector::VectorIndex;

/// Summary counters for an index backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub count: usize,
}

/// Derived similarity index over entities.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Index a new entity.
    async fn add(&self, entity: &Entity) -> Result<()>;

    /// Re-index an existing entity (inserting it if unknown).
    async fn update(&self, entity: &Entity) -> Result<()>;

    /// Drop an entity by full id. Unknown ids are not an error.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Up to `k` entities most similar to `query`, with scores in `[0, 1]`,
    /// best first.
    async fn search_similar(&self, query: &str, k: usize) -> Result<Vec<(Entity, f64)>>;

    /// Replace the whole index with exactly `entities`.
    async fn rebuild(&self, entities: &[Entity]) -> Result<()>;

    async fn stats(&self) -> Result<IndexStats>;
}

/// An index that stores nothing and finds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndex;

#[async_trait]
impl SemanticIndex for NoopIndex {
    async fn add(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    async fn update(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn search_similar(&self, _query: &str, _k: usize) -> Result<Vec<(Entity, f64)>> {
        Ok(Vec::new())
    }

    async fn rebuild(&self, _entities: &[Entity]) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats::default())
    }
}

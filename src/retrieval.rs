//! Hybrid retrieval: semantic channel + lexical scorer, fused by weight.
//!
//! # Fusion Algorithm
//!
//! 1. Ask the semantic index for `2 × limit` hits while the [`scorer`]
//!    runs over the corpus.
//! 2. Seed results from semantic hits: `score = semantic × semantic_weight`,
//!    match type `semantic`.
//! 3. Fold in text hits: an id already present gets
//!    `score += text × exact_match_boost` and becomes `hybrid`; a new id
//!    gets `score = text × exact_match_boost` and is `exact`.
//! 4. Sort by score (desc), updated (desc), id (asc). Truncate to `limit`.
//!
//! A failing semantic channel degrades to text-only results; the engine
//! itself never fails on a well-formed query.

use std::collections::HashMap;

use crate::index::SemanticIndex;
use crate::models::{Entity, ListFilter, MatchType, SearchResult};
use crate::scorer;

/// Fusion weights and result count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub semantic_weight: f64,
    pub exact_match_boost: f64,
    pub limit: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            exact_match_boost: 0.3,
            limit: 10,
        }
    }
}

impl From<&crate::config::RetrievalConfig> for RetrievalParams {
    fn from(config: &crate::config::RetrievalConfig) -> Self {
        Self {
            semantic_weight: config.semantic_weight,
            exact_match_boost: config.exact_match_boost,
            limit: config.default_limit,
        }
    }
}

/// Per-call search options. Unset fields fall back to the store defaults.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub semantic_weight: Option<f64>,
    pub exact_match_boost: Option<f64>,
    pub filter: ListFilter,
}

impl SearchOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn resolve(&self, defaults: RetrievalParams) -> RetrievalParams {
        RetrievalParams {
            semantic_weight: self.semantic_weight.unwrap_or(defaults.semantic_weight),
            exact_match_boost: self.exact_match_boost.unwrap_or(defaults.exact_match_boost),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

/// Run both channels concurrently over `corpus` and fuse.
///
/// `filter` is applied to semantic hits; the corpus is expected to be
/// filtered by the caller already.
pub async fn hybrid_search(
    index: &dyn SemanticIndex,
    corpus: &[Entity],
    query: &str,
    filter: &ListFilter,
    params: RetrievalParams,
) -> Vec<SearchResult> {
    if query.trim().is_empty() || params.limit == 0 {
        return Vec::new();
    }

    let semantic_k = params.limit.saturating_mul(2);
    let (semantic, text) = tokio::join!(index.search_similar(query, semantic_k), async {
        scorer::score_all(query, corpus)
    });

    let semantic = match semantic {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "semantic channel unavailable, using text results only");
            Vec::new()
        }
    };

    let by_id: HashMap<&str, &Entity> = corpus.iter().map(|e| (e.id(), e)).collect();
    let semantic: Vec<(Entity, f64)> = semantic
        .into_iter()
        .map(|(hit, score)| match by_id.get(hit.id()) {
            Some(fresh) => ((*fresh).clone(), score),
            None => (hit, score),
        })
        .filter(|(e, _)| filter.matches(e))
        .collect();
    let text: Vec<(Entity, f64)> = text.into_iter().map(|(e, s)| (e.clone(), s)).collect();

    fuse(semantic, text, params)
}

/// Combine channel outputs. Pure: depends only on its arguments.
pub fn fuse(
    semantic: Vec<(Entity, f64)>,
    text: Vec<(Entity, f64)>,
    params: RetrievalParams,
) -> Vec<SearchResult> {
    let mut merged: HashMap<String, SearchResult> = HashMap::new();

    for (entity, score) in semantic {
        merged
            .entry(entity.id().to_string())
            .or_insert(SearchResult {
                entity,
                score: score * params.semantic_weight,
                match_type: MatchType::Semantic,
            });
    }

    for (entity, score) in text {
        let boosted = score * params.exact_match_boost;
        match merged.get_mut(entity.id()) {
            Some(existing) => {
                existing.score += boosted;
                existing.match_type = MatchType::Hybrid;
            }
            None => {
                merged.insert(
                    entity.id().to_string(),
                    SearchResult {
                        entity,
                        score: boosted,
                        match_type: MatchType::Exact,
                    },
                );
            }
        }
    }

    let mut results: Vec<SearchResult> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.entity.metadata.updated.cmp(&a.entity.metadata.updated))
            .then(a.entity.metadata.id.cmp(&b.entity.metadata.id))
    });
    results.truncate(params.limit);
    results
}

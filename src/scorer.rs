//! Heuristic lexical relevance scoring.
//!
//! Scoring model (case-insensitive):
//! ```text
//! score = title_hit(1.0) + content_hit(0.8) + tag_hit(0.6) + coverage × 0.4
//! ```
//! where `coverage` is the fraction of query tokens longer than two
//! characters found anywhere in title, content, or tags. Coarse on purpose:
//! personal corpora are small enough to scan, so there is no inverted index.

use crate::models::Entity;

pub const TITLE_WEIGHT: f64 = 1.0;
pub const CONTENT_WEIGHT: f64 = 0.8;
pub const TAG_WEIGHT: f64 = 0.6;
pub const COVERAGE_WEIGHT: f64 = 0.4;

/// Lowercased query, split once and reused across every entity.
#[derive(Debug, Clone)]
pub struct Query {
    phrase: String,
    tokens: Vec<String>,
}

impl Query {
    pub fn new(raw: &str) -> Self {
        let phrase = raw.trim().to_lowercase();
        let tokens = phrase
            .split_whitespace()
            .filter(|t| t.chars().count() > 2)
            .map(str::to_string)
            .collect();
        Self { phrase, tokens }
    }

    pub fn is_blank(&self) -> bool {
        self.phrase.is_empty()
    }
}

/// Score one entity. `None` when no signal fired.
pub fn score(query: &Query, entity: &Entity) -> Option<f64> {
    if query.is_blank() {
        return None;
    }

    let title = entity.metadata.title.to_lowercase();
    let content = entity.content.to_lowercase();
    let tags: Vec<String> = entity
        .metadata
        .tags
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    let mut total = 0.0;
    let mut fired = false;

    if title.contains(&query.phrase) {
        total += TITLE_WEIGHT;
        fired = true;
    }
    if content.contains(&query.phrase) {
        total += CONTENT_WEIGHT;
        fired = true;
    }
    if tags.iter().any(|t| t.contains(&query.phrase)) {
        total += TAG_WEIGHT;
        fired = true;
    }

    if !query.tokens.is_empty() {
        let found = query
            .tokens
            .iter()
            .filter(|tok| {
                title.contains(tok.as_str())
                    || content.contains(tok.as_str())
                    || tags.iter().any(|t| t.contains(tok.as_str()))
            })
            .count();
        if found > 0 {
            let coverage = found as f64 / query.tokens.len() as f64;
            total += coverage * COVERAGE_WEIGHT;
            fired = true;
        }
    }

    fired.then_some(total)
}

/// Score a corpus, keeping only included entities, in corpus order.
pub fn score_all<'a>(query: &str, corpus: &'a [Entity]) -> Vec<(&'a Entity, f64)> {
    let query = Query::new(query);
    corpus
        .iter()
        .filter_map(|e| score(&query, e).map(|s| (e, s)))
        .collect()
}

/// Unranked case-insensitive substring filter over title, content, and tags.
///
/// Last-resort search path when fusion fails outright.
pub fn naive_filter<'a>(query: &str, corpus: &'a [Entity]) -> Vec<&'a Entity> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    corpus
        .iter()
        .filter(|e| {
            e.metadata.title.to_lowercase().contains(&needle)
                || e.content.to_lowercase().contains(&needle)
                || e.metadata
                    .tags
                    .iter()
                    .any(|t| t.to_lowercase().contains(&needle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now, Metadata};
    use std::path::PathBuf;

    fn entity(title: &str, content: &str, tags: &[&str]) -> Entity {
        let ts = now();
        Entity {
            metadata: Metadata {
                id: title.to_string(),
                title: title.to_string(),
                entity_type: "note".to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                created: ts,
                updated: ts,
                expires: None,
                relations: Vec::new(),
            },
            content: content.to_string(),
            filepath: PathBuf::new(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_title_only_single_token() {
        let e = entity("Rust Notes", "nothing here", &[]);
        // title hit + full coverage of the single token "rust"
        let s = score(&Query::new("rust"), &e).unwrap();
        assert!(approx(s, 1.0 + 0.4));
    }

    #[test]
    fn test_all_signals() {
        let e = entity("kyoto", "kyoto in autumn", &["Kyoto-trip"]);
        let s = score(&Query::new("Kyoto"), &e).unwrap();
        assert!(approx(s, 1.0 + 0.8 + 0.6 + 0.4));
    }

    #[test]
    fn test_partial_coverage_only() {
        let e = entity("Groceries", "buy apples and pears", &[]);
        // phrase "apples bananas" matches nothing; one of two tokens found
        let s = score(&Query::new("apples bananas"), &e).unwrap();
        assert!(approx(s, 0.5 * 0.4));
    }

    #[test]
    fn test_short_tokens_ignored_for_coverage() {
        let e = entity("x", "an ox", &[]);
        assert!(score(&Query::new("ox an"), &e).is_none());
        assert!(approx(score(&Query::new("ox"), &e).unwrap(), 0.8));
    }

    #[test]
    fn test_no_signal_excluded() {
        let e = entity("Groceries", "apples", &["food"]);
        assert!(score(&Query::new("kubernetes"), &e).is_none());
    }

    #[test]
    fn test_blank_query_matches_nothing() {
        let e = entity("Groceries", "apples", &[]);
        assert!(score(&Query::new("   "), &e).is_none());
        assert!(naive_filter("  ", &[e]).is_empty());
    }

    #[test]
    fn test_score_all_keeps_corpus_order() {
        let corpus = vec![
            entity("b apples", "", &[]),
            entity("nothing", "", &[]),
            entity("a apples", "", &[]),
        ];
        let hits = score_all("apples", &corpus);
        let ids: Vec<&str> = hits.iter().map(|(e, _)| e.id()).collect();
        assert_eq!(ids, vec!["b apples", "a apples"]);
    }

    #[test]
    fn test_naive_filter_case_insensitive() {
        let corpus = vec![
            entity("Meeting", "Discussed BUDGET", &[]),
            entity("Other", "", &["budget-2024"]),
            entity("Unrelated", "", &[]),
        ];
        let hits = naive_filter("budget", &corpus);
        assert_eq!(hits.len(), 2);
    }
}

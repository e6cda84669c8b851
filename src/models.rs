//! Core data models used throughout Memory Harness.
//!
//! These types represent the entities ("memories") stored on disk, the
//! partial updates applied to them, and the search results that flow out
//! of the retrieval engine.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Frontmatter metadata of a stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// UUIDv4, assigned at creation and never changed.
    pub id: String,
    pub title: String,
    /// Slash-delimited taxonomy path. Filtering is exact-match only.
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "iso8601")]
    pub created: DateTime<Utc>,
    #[serde(with = "iso8601")]
    pub updated: DateTime<Utc>,
    #[serde(
        default,
        with = "iso8601::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<DateTime<Utc>>,
    /// Ids of related entities. Not validated.
    #[serde(default)]
    pub relations: Vec<String>,
}

/// A stored memory: metadata, markdown body, and where it was found on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(flatten)]
    pub metadata: Metadata,
    pub content: String,
    /// Physical location. Computed once at creation; a cache, not an identity.
    pub filepath: PathBuf,
}

impl Entity {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// First 8 characters of the id, as embedded in the filename.
    pub fn id_prefix(&self) -> &str {
        id_prefix(&self.metadata.id)
    }
}

/// Returns the filename prefix for an id (the whole id when shorter than 8).
pub fn id_prefix(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Current time truncated to milliseconds, the precision of the persisted form.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Input for [`EntityStore::create`](crate::store::EntityStore::create).
#[derive(Debug, Clone, Default)]
pub struct NewEntity {
    pub title: String,
    pub content: String,
    pub entity_type: String,
    pub tags: Vec<String>,
    pub expires: Option<DateTime<Utc>>,
    pub relations: Vec<String>,
    /// Overrides the directory derived from `entity_type`.
    pub directory: Option<String>,
}

impl NewEntity {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations = relations.into_iter().map(Into::into).collect();
        self
    }

    pub fn expires_at(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn in_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Partial update. `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub entity_type: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the expiry.
    pub expires: Option<Option<DateTime<Utc>>>,
    pub relations: Option<Vec<String>>,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.entity_type.is_none()
            && self.tags.is_none()
            && self.expires.is_none()
            && self.relations.is_none()
    }
}

/// Filter for [`EntityStore::list`](crate::store::EntityStore::list).
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Exact `type` match. `"work"` does not match `"work/projects"`.
    pub entity_type: Option<String>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
}

impl ListFilter {
    pub fn by_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            tags: Vec::new(),
        }
    }

    pub fn by_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_type: None,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_type.is_none() && self.tags.is_empty()
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(ref wanted) = self.entity_type {
            if &entity.metadata.entity_type != wanted {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|tag| entity.metadata.tags.iter().any(|t| t == tag))
    }
}

/// Which retrieval channel(s) produced a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Exact,
    Hybrid,
}

/// A fused search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entity: Entity,
    pub score: f64,
    pub match_type: MatchType,
}

/// Serde helpers writing timestamps as RFC 3339 UTC with millisecond precision.
pub(crate) mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_str(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                Some(raw) if !raw.trim().is_empty() => super::parse(&raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                _ => Ok(None),
            }
        }
    }
}

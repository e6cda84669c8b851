//! Markdown + YAML frontmatter codec for entity files.
//!
//! The persisted form is:
//!
//! ```text
//! ---
//! id: 3f6c1e0a-...
//! title: Trip
//! type: travel/japan/2024
//! ...
//! ---
//!
//! markdown body
//! ```
//!
//! [`parse`] and [`stringify`] are pure; [`read_entity`] and
//! [`write_entity`] add the file I/O.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{Entity, Metadata};

const DELIMITER: &str = "---";

/// A file that cannot be decoded as an entity.
///
/// Fatal to the single parse only; scanners skip such files.
#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("missing opening '---' frontmatter delimiter")]
    MissingOpening,
    #[error("missing closing '---' frontmatter delimiter")]
    MissingClosing,
    #[error("invalid frontmatter: {0}")]
    InvalidMetadata(#[from] serde_yaml::Error),
}

/// Serialize an entity to its persisted form.
pub fn stringify(metadata: &Metadata, content: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(metadata).context("Failed to serialize frontmatter")?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n\n{content}"))
}

/// Parse the persisted form into metadata and body.
///
/// Delimiter and YAML lines may end in `\r\n`; the body is returned
/// byte-for-byte as stored.
pub fn parse(raw: &str) -> Result<(Metadata, String), FrontmatterError> {
    let rest = strip_delimiter_line(raw).ok_or(FrontmatterError::MissingOpening)?;

    let mut offset = 0;
    let mut closing = None;
    for line in rest.split_inclusive('\n') {
        if strip_delimiter_line(line).is_some() {
            closing = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (yaml_end, body_start) = closing.ok_or(FrontmatterError::MissingClosing)?;

    let yaml = &rest[..yaml_end];
    let metadata: Metadata = if yaml.contains('\r') {
        serde_yaml::from_str(&yaml.replace("\r\n", "\n"))?
    } else {
        serde_yaml::from_str(yaml)?
    };

    let body = &rest[body_start..];
    let content = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    Ok((metadata, content.to_string()))
}

/// Remainder after a leading `---` line ending in `\n`, `\r\n` or end of input.
fn strip_delimiter_line(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(DELIMITER)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

/// Read and decode one entity file.
///
/// The outer error is an I/O failure; the inner one a decode failure for
/// this file only.
pub async fn read_entity(path: &Path) -> Result<Result<Entity, FrontmatterError>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read entity file: {}", path.display()))?;
    Ok(parse(&raw).map(|(metadata, content)| Entity {
        metadata,
        content,
        filepath: path.to_path_buf(),
    }))
}

/// Encode and write an entity to `entity.filepath`, creating parent directories.
pub async fn write_entity(entity: &Entity) -> Result<PathBuf> {
    let path = &entity.filepath;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let raw = stringify(&entity.metadata, &entity.content)?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("Failed to write entity file: {}", path.display()))?;
    Ok(path.clone())
}

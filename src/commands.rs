//! CLI command implementations.
//!
//! Each `run_*` function opens the [`App`], performs one operation, and
//! prints to stdout. With `json` set, output is a single JSON document so
//! scripts can consume it; logs always go to stderr.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Read;

use crate::app::App;
use crate::config::Config;
use crate::index::IndexStats;
use crate::models::{iso8601, Entity, EntityPatch, ListFilter, NewEntity};
use crate::retrieval::SearchOptions;
use crate::store::normalize_type;
use crate::sync::{PullOutcome, SyncStatus};

/// Fields accepted by `mem add`.
#[derive(Debug, Clone, Default)]
pub struct AddArgs {
    pub title: String,
    /// Body text; `-` reads stdin.
    pub content: Option<String>,
    pub entity_type: String,
    pub tags: Vec<String>,
    pub relations: Vec<String>,
    pub expires: Option<String>,
    pub directory: Option<String>,
}

/// Fields accepted by `mem update`. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    pub title: Option<String>,
    pub content: Option<String>,
    pub entity_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub relations: Option<Vec<String>>,
    pub expires: Option<String>,
    pub clear_expires: bool,
}

pub async fn run_init(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let status = app.sync().status().await?;
    println!("Memory store ready at {}", config.storage.root.display());
    if status.has_remote {
        println!("remote: {} (ahead {}, behind {})", remote_label(config), status.ahead, status.behind);
    }
    app.shutdown().await;
    Ok(())
}

pub async fn run_add(config: &Config, args: AddArgs) -> Result<()> {
    let content = read_content(args.content.as_deref())?;
    let mut draft = NewEntity::new(args.title, content, args.entity_type)
        .with_tags(args.tags)
        .with_relations(args.relations);
    if let Some(raw) = args.expires.as_deref() {
        draft = draft.expires_at(parse_timestamp(raw)?);
    }
    if let Some(dir) = args.directory {
        draft = draft.in_directory(dir);
    }

    let app = App::open(config).await?;
    let entity = app.store().create(draft).await?;
    println!("{}", entity.id());
    app.shutdown().await;
    Ok(())
}

pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let Some(entity) = app.store().read(id).await? else {
        bail!("memory not found: {}", id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entity)?);
        return Ok(());
    }

    print_header(&entity);
    println!();
    println!("{}", entity.content);
    Ok(())
}

pub async fn run_update(config: &Config, id: &str, args: UpdateArgs) -> Result<()> {
    let expires = if args.clear_expires {
        Some(None)
    } else {
        match args.expires.as_deref() {
            Some(raw) => Some(Some(parse_timestamp(raw)?)),
            None => None,
        }
    };
    let patch = EntityPatch {
        title: args.title,
        content: args.content.as_deref().map(|c| read_content(Some(c))).transpose()?,
        entity_type: args.entity_type,
        tags: args.tags,
        expires,
        relations: args.relations,
    };
    if patch.is_empty() {
        bail!("nothing to update: pass at least one field");
    }

    let app = App::open(config).await?;
    match app.store().update(id, patch).await? {
        Some(entity) => println!("Updated {}", entity.id()),
        None => bail!("memory not found: {}", id),
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let app = App::open(config).await?;
    if !app.store().delete(id).await? {
        bail!("memory not found: {}", id);
    }
    println!("Deleted {}", id);
    Ok(())
}

pub async fn run_list(config: &Config, filter: ListFilter, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let entities = app.store().list(&normalize_filter(filter)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entities)?);
        return Ok(());
    }
    if entities.is_empty() {
        println!("No memories.");
        return Ok(());
    }
    for entity in &entities {
        println!(
            "{}  {:<24}  {}{}",
            entity.id_prefix(),
            display_type(&entity.metadata.entity_type),
            entity.metadata.title,
            format_tags(&entity.metadata.tags)
        );
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    filter: ListFilter,
    json: bool,
) -> Result<()> {
    let app = App::open(config).await?;
    let opts = SearchOptions {
        limit,
        filter: normalize_filter(filter),
        ..Default::default()
    };
    let results = app.store().search(query, &opts).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("Results for: \"{}\"\n", query);
    for (i, result) in results.iter().enumerate() {
        let meta = &result.entity.metadata;
        println!(
            "{}. [{:.2}] {} ({:?})",
            i + 1,
            result.score,
            meta.title,
            result.match_type
        );
        println!("    type: {}", display_type(&meta.entity_type));
        if !meta.tags.is_empty() {
            println!("    tags: {}", meta.tags.join(", "));
        }
        println!("    updated: {}", iso8601::format(&meta.updated));
        println!("    id: {}", meta.id);
        println!();
    }
    Ok(())
}

pub async fn run_sync(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    if !app.sync().has_remote() {
        println!("No remote configured; nothing to sync.");
        return Ok(());
    }

    let report = app.sync().sync().await;
    match &report.pull {
        PullOutcome::NoRemote => {}
        PullOutcome::UpToDate => println!("pull: up to date"),
        PullOutcome::Merged { commits } => println!("pull: merged {} commit(s)", commits),
        PullOutcome::ConflictsResolved { files, backup_dir } => {
            println!("pull: resolved {} conflict(s), remote version kept", files.len());
            for file in files {
                println!("    {}", file);
            }
            println!("    local versions backed up to {}", backup_dir.display());
        }
        PullOutcome::ResetToRemote { files } => {
            println!(
                "pull: could not resolve {} conflict(s); reset to remote",
                files.len()
            );
        }
        PullOutcome::Failed(msg) => println!("pull: failed: {}", msg),
    }
    match (&report.push_error, report.pushed) {
        (Some(err), _) => println!("push: failed: {}", err),
        (None, true) => println!("push: done"),
        (None, false) => println!("push: nothing to push"),
    }

    if matches!(report.pull, PullOutcome::Failed(_)) || report.push_error.is_some() {
        bail!("sync incomplete");
    }
    Ok(())
}

pub async fn run_reindex(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let count = app.store().reindex().await?;
    println!("Reindexed {} memories.", count);
    Ok(())
}

#[derive(Serialize)]
struct StatsReport {
    entities: usize,
    index: IndexStats,
    sync: SyncStatusReport,
}

#[derive(Serialize)]
struct SyncStatusReport {
    has_remote: bool,
    ahead: usize,
    behind: usize,
}

impl From<SyncStatus> for SyncStatusReport {
    fn from(s: SyncStatus) -> Self {
        Self {
            has_remote: s.has_remote,
            ahead: s.ahead,
            behind: s.behind,
        }
    }
}

pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let report = StatsReport {
        entities: app.store().list(&ListFilter::default()).await?.len(),
        index: app.store().index_stats().await?,
        sync: app.sync().status().await?.into(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("memories:  {}", report.entities);
    println!("indexed:   {}", report.index.count);
    if report.sync.has_remote {
        println!(
            "remote:    {} (ahead {}, behind {})",
            remote_label(config),
            report.sync.ahead,
            report.sync.behind
        );
    } else {
        println!("remote:    (none)");
    }
    Ok(())
}

/// Run the reconciler and background sync until Ctrl-C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    app.start_background()?;
    eprintln!(
        "Watching {} (Ctrl-C to stop)",
        config.entities_dir().display()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    app.shutdown().await;
    Ok(())
}

fn read_content(raw: Option<&str>) -> Result<String> {
    match raw {
        Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read content from stdin")?;
            Ok(buf)
        }
        Some(text) => Ok(text.to_string()),
        None => Ok(String::new()),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    iso8601::parse(raw).with_context(|| format!("invalid timestamp (expected RFC 3339): {}", raw))
}

fn normalize_filter(mut filter: ListFilter) -> ListFilter {
    filter.entity_type = filter.entity_type.map(|t| normalize_type(&t));
    filter
}

fn print_header(entity: &Entity) {
    let meta = &entity.metadata;
    println!("id:        {}", meta.id);
    println!("title:     {}", meta.title);
    println!("type:      {}", display_type(&meta.entity_type));
    if !meta.tags.is_empty() {
        println!("tags:      {}", meta.tags.join(", "));
    }
    println!("created:   {}", iso8601::format(&meta.created));
    println!("updated:   {}", iso8601::format(&meta.updated));
    if let Some(ref expires) = meta.expires {
        println!("expires:   {}", iso8601::format(expires));
    }
    if !meta.relations.is_empty() {
        println!("relations: {}", meta.relations.join(", "));
    }
    println!("file:      {}", entity.filepath.display());
}

fn display_type(entity_type: &str) -> &str {
    if entity_type.is_empty() {
        "(none)"
    } else {
        entity_type
    }
}

fn format_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!("  [{}]", tags.join(", "))
    }
}

fn remote_label(config: &Config) -> String {
    config
        .remote
        .as_ref()
        .map(|r| crate::git::redact(&r.url))
        .unwrap_or_default()
}

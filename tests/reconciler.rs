use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use memory_harness::frontmatter;
use memory_harness::index::{IndexStats, SemanticIndex};
use memory_harness::models::{now, Entity, Metadata};
use memory_harness::reconciler::IndexReconciler;
use tempfile::TempDir;

/// Index double that records every call as `"<op>:<id>"`.
#[derive(Default)]
struct RecordingIndex {
    calls: Mutex<Vec<String>>,
}

impl RecordingIndex {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, id: &str) {
        self.calls.lock().unwrap().push(format!("{op}:{id}"));
    }
}

#[async_trait]
impl SemanticIndex for RecordingIndex {
    async fn add(&self, entity: &Entity) -> Result<()> {
        self.record("add", entity.id());
        Ok(())
    }
    async fn update(&self, entity: &Entity) -> Result<()> {
        self.record("update", entity.id());
        Ok(())
    }
    async fn remove(&self, id: &str) -> Result<()> {
        self.record("remove", id);
        Ok(())
    }
    async fn search_similar(&self, _: &str, _: usize) -> Result<Vec<(Entity, f64)>> {
        Ok(Vec::new())
    }
    async fn rebuild(&self, _: &[Entity]) -> Result<()> {
        Ok(())
    }
    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats::default())
    }
}

fn entity_at(dir: &Path, id: &str, title: &str) -> Entity {
    let ts = now();
    Entity {
        metadata: Metadata {
            id: id.to_string(),
            title: title.to_string(),
            entity_type: "note".to_string(),
            tags: Vec::new(),
            created: ts,
            updated: ts,
            expires: None,
            relations: Vec::new(),
        },
        content: "written behind the store's back".to_string(),
        filepath: dir.join(format!("{}-{}.md", title, &id[..8])),
    }
}

async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

#[tokio::test]
async fn test_external_writes_reach_the_index() {
    let tmp = TempDir::new().unwrap();
    let entities = tmp.path().join("entities");
    std::fs::create_dir_all(entities.join("note")).unwrap();

    let index = Arc::new(RecordingIndex::default());
    let reconciler = IndexReconciler::new(&entities, index.clone() as Arc<dyn SemanticIndex>);
    reconciler.start().unwrap();
    reconciler.start().unwrap();
    assert!(reconciler.is_running());

    let id = "9a8b7c6d-0000-4000-8000-000000000001";
    let mut entity = entity_at(&entities.join("note"), id, "outside");
    frontmatter::write_entity(&entity).await.unwrap();

    let seen = wait_for(|| index.calls().iter().any(|c| c.ends_with(id))).await;
    assert!(seen, "no index call for external create: {:?}", index.calls());

    entity.content = "edited again".to_string();
    let before = index.calls().len();
    frontmatter::write_entity(&entity).await.unwrap();
    let seen = wait_for(|| index.calls().len() > before).await;
    assert!(seen, "no index call for external modify");

    std::fs::remove_file(&entity.filepath).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        !index.calls().iter().any(|c| c.starts_with("remove:")),
        "unlink must not remove index entries: {:?}",
        index.calls()
    );

    reconciler.stop().await;
    reconciler.stop().await;
    assert!(!reconciler.is_running());
}

#[tokio::test]
async fn test_ignored_paths_never_reach_the_index() {
    let tmp = TempDir::new().unwrap();
    let entities = tmp.path().join("entities");
    std::fs::create_dir_all(entities.join(".drafts")).unwrap();

    let index = Arc::new(RecordingIndex::default());
    let reconciler = IndexReconciler::new(&entities, index.clone() as Arc<dyn SemanticIndex>);
    reconciler.start().unwrap();

    let hidden = entity_at(
        &entities.join(".drafts"),
        "11111111-0000-4000-8000-000000000001",
        "hidden",
    );
    frontmatter::write_entity(&hidden).await.unwrap();
    std::fs::write(entities.join("notes.txt"), "plain text").unwrap();
    std::fs::write(entities.join("broken-22222222.md"), "no frontmatter").unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(index.calls().is_empty(), "unexpected calls: {:?}", index.calls());

    reconciler.stop().await;
}

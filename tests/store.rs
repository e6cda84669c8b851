use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use memory_harness::config::Config;
use memory_harness::frontmatter;
use memory_harness::index::{NoopIndex, SemanticIndex};
use memory_harness::models::{EntityPatch, ListFilter, MatchType, NewEntity};
use memory_harness::retrieval::SearchOptions;
use memory_harness::store::{EntityStore, StoreOptions};
use memory_harness::sync::SyncManager;
use tempfile::TempDir;

fn local_store(root: &Path) -> EntityStore {
    let options = StoreOptions {
        auto_commit: false,
        ..Default::default()
    };
    EntityStore::new(root.join("entities"), Arc::new(NoopIndex), options)
}

async fn committing_store(root: &Path) -> (EntityStore, Arc<SyncManager>) {
    let config = Config::with_root(root);
    let sync = Arc::new(SyncManager::from_config(&config));
    sync.init().await.unwrap();
    let store = EntityStore::new(config.entities_dir(), Arc::new(NoopIndex), StoreOptions::default())
        .with_sync(Arc::clone(&sync));
    (store, sync)
}

#[tokio::test]
async fn test_create_writes_file_under_type_directory() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());

    let entity = store
        .create(NewEntity::new("Trip to Japan", "Kyoto in May", "travel/japan/2024").with_tags(["trip"]))
        .await
        .unwrap();

    let expected_dir = tmp.path().join("entities/travel/japan/2024");
    assert_eq!(entity.filepath.parent().unwrap(), expected_dir);
    let name = entity.filepath.file_name().unwrap().to_string_lossy().to_string();
    assert_eq!(name, format!("trip-to-japan-{}.md", &entity.metadata.id[..8]));
    assert_eq!(entity.metadata.created, entity.metadata.updated);

    let raw = fs::read_to_string(&entity.filepath).unwrap();
    assert!(raw.starts_with("---\n"));
    let (meta, content) = frontmatter::parse(&raw).unwrap();
    assert_eq!(meta, entity.metadata);
    assert_eq!(content, "Kyoto in May");
}

#[tokio::test]
async fn test_read_roundtrips_and_unknown_is_none() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let entity = store.create(NewEntity::new("A", "body", "note")).await.unwrap();

    let read = store.read(&entity.metadata.id).await.unwrap().unwrap();
    assert_eq!(read.metadata, entity.metadata);
    assert_eq!(read.content, "body");
    assert_eq!(read.filepath, entity.filepath);

    assert!(store.read("00000000-0000-4000-8000-000000000000").await.unwrap().is_none());
    assert!(store.read("").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_keeps_id_and_filepath() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let entity = store.create(NewEntity::new("Original", "v1", "work")).await.unwrap();

    let patch = EntityPatch {
        title: Some("x".to_string()),
        entity_type: Some("personal".to_string()),
        ..Default::default()
    };
    let updated = store.update(&entity.metadata.id, patch).await.unwrap().unwrap();
    assert_eq!(updated.metadata.id, entity.metadata.id);
    assert_eq!(updated.filepath, entity.filepath);
    assert_eq!(updated.metadata.created, entity.metadata.created);
    assert!(updated.metadata.updated >= entity.metadata.updated);

    let read = store.read(&entity.metadata.id).await.unwrap().unwrap();
    assert_eq!(read.metadata.title, "x");
    assert_eq!(read.metadata.entity_type, "personal");
    assert_eq!(read.content, "v1");
    assert_eq!(read.filepath, entity.filepath);

    assert!(store
        .update("00000000-0000-4000-8000-000000000000", EntityPatch::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_delete_unknown_is_false() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    assert!(!store.delete("unknown-id").await.unwrap());

    let entity = store.create(NewEntity::new("Gone", "", "note")).await.unwrap();
    assert!(store.delete(&entity.metadata.id).await.unwrap());
    assert!(!entity.filepath.exists());
    assert!(store.read(&entity.metadata.id).await.unwrap().is_none());
    assert!(!store.delete(&entity.metadata.id).await.unwrap());
}

#[tokio::test]
async fn test_list_is_stable_and_newest_first() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let first = store.create(NewEntity::new("first", "", "note")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = store.create(NewEntity::new("second", "", "note")).await.unwrap();

    let a = store.list(&ListFilter::default()).await.unwrap();
    let b = store.list(&ListFilter::default()).await.unwrap();
    let ids = |v: &[memory_harness::models::Entity]| v.iter().map(|e| e.metadata.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&a), ids(&b));
    assert_eq!(ids(&a), vec![second.metadata.id.clone(), first.metadata.id.clone()]);
}

#[tokio::test]
async fn test_list_type_filter_is_exact() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let alpha = store.create(NewEntity::new("Alpha", "", "work/projects/alpha")).await.unwrap();
    let work = store.create(NewEntity::new("Standup", "", "work")).await.unwrap();
    let trip = store.create(NewEntity::new("Trip", "...", "travel/japan/2024")).await.unwrap();

    let only_work = store.list(&ListFilter::by_type("work")).await.unwrap();
    assert_eq!(only_work.len(), 1);
    assert_eq!(only_work[0].metadata.id, work.metadata.id);

    let nested = store.list(&ListFilter::by_type("work/projects/alpha")).await.unwrap();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].metadata.id, alpha.metadata.id);

    assert!(store.list(&ListFilter::by_type("travel/japan")).await.unwrap().is_empty());
    let japan = store.list(&ListFilter::by_type("travel/japan/2024")).await.unwrap();
    assert_eq!(japan.len(), 1);
    assert_eq!(japan[0].metadata.id, trip.metadata.id);
}

#[tokio::test]
async fn test_list_tag_filter_requires_all_tags() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let both = store
        .create(NewEntity::new("both", "", "note").with_tags(["a", "b"]))
        .await
        .unwrap();
    store
        .create(NewEntity::new("only a", "", "note").with_tags(["a"]))
        .await
        .unwrap();
    store
        .create(NewEntity::new("upper", "", "note").with_tags(["A", "B"]))
        .await
        .unwrap();

    let found = store.list(&ListFilter::by_tags(["a", "b"])).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].metadata.id, both.metadata.id);
}

#[tokio::test]
async fn test_list_skips_unparseable_and_hidden_files() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let good = store.create(NewEntity::new("Good", "", "note")).await.unwrap();

    let entities = tmp.path().join("entities");
    fs::write(entities.join("note/broken-deadbeef.md"), "no frontmatter here").unwrap();
    fs::write(entities.join("note/readme.txt"), "not markdown").unwrap();
    fs::create_dir_all(entities.join(".trash")).unwrap();
    fs::copy(&good.filepath, entities.join(".trash/copy.md")).unwrap();

    let all = store.list(&ListFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].metadata.id, good.metadata.id);
}

#[tokio::test]
async fn test_hand_written_file_is_discoverable() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let dir = tmp.path().join("entities/ideas");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("garden-5f0c1a2b.md"),
        "---\nid: 5f0c1a2b-0000-4000-8000-000000000001\ntitle: Garden\ntype: ideas\ntags: [plants]\ncreated: 2024-03-01T09:00:00.000Z\nupdated: 2024-03-02T09:00:00.000Z\nrelations: []\n---\n\nTomatoes along the fence.\n",
    )
    .unwrap();

    let entity = store
        .read("5f0c1a2b-0000-4000-8000-000000000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entity.metadata.title, "Garden");
    assert_eq!(entity.content, "Tomatoes along the fence.\n");
}

#[tokio::test]
async fn test_search_text_only_when_index_disabled() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    let kyoto = store
        .create(NewEntity::new("Kyoto temples", "Fushimi Inari at dawn", "travel"))
        .await
        .unwrap();
    store
        .create(NewEntity::new("Groceries", "milk and eggs", "todo"))
        .await
        .unwrap();

    let results = store.search("kyoto", &SearchOptions::default()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity.metadata.id, kyoto.metadata.id);
    assert_eq!(results[0].match_type, MatchType::Exact);
    assert!(results[0].score > 0.0);

    assert!(store.search("", &SearchOptions::default()).await.unwrap().is_empty());
    assert!(store.search("zebra", &SearchOptions::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_respects_filter_and_limit() {
    let tmp = TempDir::new().unwrap();
    let store = local_store(tmp.path());
    for i in 0..5 {
        store
            .create(NewEntity::new(format!("rust note {i}"), "ownership", "dev"))
            .await
            .unwrap();
    }
    store
        .create(NewEntity::new("rust in cars", "oxidation", "garage"))
        .await
        .unwrap();

    let opts = SearchOptions {
        limit: Some(3),
        ..Default::default()
    };
    assert_eq!(store.search("rust", &opts).await.unwrap().len(), 3);

    let opts = SearchOptions {
        filter: ListFilter::by_type("garage"),
        ..Default::default()
    };
    let results = store.search("rust", &opts).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity.metadata.title, "rust in cars");
}

#[tokio::test]
async fn test_mutations_are_committed() {
    let tmp = TempDir::new().unwrap();
    let (store, sync) = committing_store(tmp.path()).await;

    let entity = store.create(NewEntity::new("Committed", "x", "note")).await.unwrap();
    assert!(sync.repo().is_clean().await.unwrap());
    let log = sync.repo().run(&["log", "--format=%s", "-1"]).await.unwrap();
    assert!(log.contains("add \"Committed\""), "unexpected log: {log}");

    store
        .update(
            &entity.metadata.id,
            EntityPatch {
                content: Some("y".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let log = sync.repo().run(&["log", "--format=%s", "-1"]).await.unwrap();
    assert!(log.contains("update"), "unexpected log: {log}");

    store.delete(&entity.metadata.id).await.unwrap();
    let log = sync.repo().run(&["log", "--format=%s", "-1"]).await.unwrap();
    assert!(log.contains("delete"), "unexpected log: {log}");
    assert!(sync.repo().is_clean().await.unwrap());
}

#[tokio::test]
async fn test_index_failure_does_not_fail_writes() {
    use anyhow::Result;
    use async_trait::async_trait;
    use memory_harness::index::IndexStats;
    use memory_harness::models::Entity;

    struct Broken;

    #[async_trait]
    impl SemanticIndex for Broken {
        async fn add(&self, _: &Entity) -> Result<()> {
            anyhow::bail!("offline")
        }
        async fn update(&self, _: &Entity) -> Result<()> {
            anyhow::bail!("offline")
        }
        async fn remove(&self, _: &str) -> Result<()> {
            anyhow::bail!("offline")
        }
        async fn search_similar(&self, _: &str, _: usize) -> Result<Vec<(Entity, f64)>> {
            anyhow::bail!("offline")
        }
        async fn rebuild(&self, _: &[Entity]) -> Result<()> {
            anyhow::bail!("offline")
        }
        async fn stats(&self) -> Result<IndexStats> {
            anyhow::bail!("offline")
        }
    }

    let tmp = TempDir::new().unwrap();
    let options = StoreOptions {
        auto_commit: false,
        ..Default::default()
    };
    let store = EntityStore::new(tmp.path().join("entities"), Arc::new(Broken), options);

    let entity = store.create(NewEntity::new("Resilient", "text", "note")).await.unwrap();
    store
        .update(
            &entity.metadata.id,
            EntityPatch {
                title: Some("Still resilient".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let results = store.search("resilient", &SearchOptions::default()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].match_type, MatchType::Exact);

    assert!(store.reindex().await.is_err());
    assert!(store.delete(&entity.metadata.id).await.unwrap());
}

#[tokio::test]
async fn test_search_survives_panicking_index() {
    use anyhow::Result;
    use async_trait::async_trait;
    use memory_harness::index::IndexStats;
    use memory_harness::models::Entity;

    struct Panicking;

    #[async_trait]
    impl SemanticIndex for Panicking {
        async fn add(&self, _: &Entity) -> Result<()> {
            Ok(())
        }
        async fn update(&self, _: &Entity) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn search_similar(&self, _: &str, _: usize) -> Result<Vec<(Entity, f64)>> {
            panic!("provider bug")
        }
        async fn rebuild(&self, _: &[Entity]) -> Result<()> {
            Ok(())
        }
        async fn stats(&self) -> Result<IndexStats> {
            Ok(IndexStats::default())
        }
    }

    let tmp = TempDir::new().unwrap();
    let options = StoreOptions {
        auto_commit: false,
        ..Default::default()
    };
    let store = EntityStore::new(tmp.path().join("entities"), Arc::new(Panicking), options);
    let garden = store
        .create(NewEntity::new("Garden", "tomatoes along the fence", "home"))
        .await
        .unwrap();
    store.create(NewEntity::new("Desk", "monitor arm", "home")).await.unwrap();

    let results = store.search("fence", &SearchOptions::default()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity.metadata.id, garden.metadata.id);
    assert_eq!(results[0].score, 0.0);
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mem_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mem"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
root = "{}/memories"

[git]
auto_commit = true
branch = "main"

[retrieval]
default_limit = 5
"#,
        root.display()
    );

    let config_path = config_dir.join("mem.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mem(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mem_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mem binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn add(config_path: &Path, args: &[&str]) -> String {
    let mut full = vec!["add"];
    full.extend_from_slice(args);
    let (stdout, stderr, success) = run_mem(config_path, &full);
    assert!(success, "add failed: stdout={}, stderr={}", stdout, stderr);
    stdout.trim().to_string()
}

#[test]
fn test_init_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mem(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ready"));

    let (_, _, success) = run_mem(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");

    let store = tmp.path().join("memories");
    assert!(store.join(".git").exists());
    assert!(store.join("entities/.gitkeep").exists());
}

#[test]
fn test_add_get_update_delete() {
    let (_tmp, config_path) = setup_test_env();

    let id = add(
        &config_path,
        &[
            "--title",
            "Trip to Japan",
            "--type",
            "travel/japan/2024",
            "--tag",
            "trip",
            "--content",
            "Kyoto in May",
        ],
    );
    assert_eq!(id.len(), 36, "expected a uuid, got {id}");

    let (stdout, _, success) = run_mem(&config_path, &["get", &id]);
    assert!(success);
    assert!(stdout.contains("Trip to Japan"));
    assert!(stdout.contains("travel/japan/2024"));
    assert!(stdout.contains("Kyoto in May"));

    let (stdout, stderr, success) =
        run_mem(&config_path, &["update", &id, "--title", "Japan, revised"]);
    assert!(success, "update failed: stdout={}, stderr={}", stdout, stderr);

    let (stdout, _, success) = run_mem(&config_path, &["get", &id, "--json"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["title"], "Japan, revised");
    assert_eq!(json["type"], "travel/japan/2024");
    assert_eq!(json["content"], "Kyoto in May");

    let (_, _, success) = run_mem(&config_path, &["delete", &id]);
    assert!(success);
    let (_, stderr, success) = run_mem(&config_path, &["get", &id]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_list_and_search() {
    let (_tmp, config_path) = setup_test_env();

    let alpha = add(
        &config_path,
        &["--title", "Alpha launch", "--type", "work/projects/alpha", "--content", "rollout checklist"],
    );
    add(
        &config_path,
        &["--title", "Standup", "--type", "work", "--content", "daily notes"],
    );

    let (stdout, _, success) = run_mem(&config_path, &["list", "--json"]);
    assert!(success);
    let all: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(all.len(), 2);

    let (stdout, _, success) = run_mem(&config_path, &["list", "--type", "work", "--json"]);
    assert!(success);
    let work: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(work.len(), 1);
    assert_eq!(work[0]["title"], "Standup");

    let (stdout, _, success) = run_mem(&config_path, &["search", "rollout", "--json"]);
    assert!(success);
    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["entity"]["id"], alpha.as_str());
    assert_eq!(results[0]["match_type"], "exact");

    let (stdout, _, success) = run_mem(&config_path, &["search", "nonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stats_and_reindex() {
    let (_tmp, config_path) = setup_test_env();
    add(&config_path, &["--title", "One"]);

    let (stdout, _, success) = run_mem(&config_path, &["stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["entities"], 1);
    assert_eq!(stats["sync"]["has_remote"], false);

    let (stdout, _, success) = run_mem(&config_path, &["reindex"]);
    assert!(success);
    assert!(stdout.contains("Reindexed 1"));

    let (stdout, _, success) = run_mem(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("No remote"));
}

#[test]
fn test_update_without_fields_fails() {
    let (_tmp, config_path) = setup_test_env();
    let id = add(&config_path, &["--title", "Static"]);
    let (_, stderr, success) = run_mem(&config_path, &["update", &id]);
    assert!(!success);
    assert!(stderr.contains("nothing to update"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_mem(&missing, &["list"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_completions_need_no_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (stdout, _, success) = run_mem(&missing, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("mem"));
}

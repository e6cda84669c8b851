//! Replication and sync: local git history plus optional remote mirroring.
//!
//! # Initialization
//!
//! | Situation | Action |
//! |-----------|--------|
//! | no remote configured | `git init` if needed, ensure skeleton, initial commit |
//! | remote configured, no repo yet | bootstrap-replace |
//! | `origin` differs from configured URL | bootstrap-replace |
//! | `origin` matches (or is missing) | local init, register `origin` if missing |
//!
//! Bootstrap-replace backs the current tree up to `.memory/backups/<ts>/`,
//! wipes everything except `.memory/`, shallow-clones the remote, and
//! re-creates the skeleton. A failed clone is fatal: there is no fallback.
//!
//! # Pull
//!
//! `fetch` → merge if behind → on conflict run the [`ConflictResolver`]. If
//! the resolver fails the merge is aborted, local changes are copied to the
//! conflicts folder and the branch is hard-reset to the remote tip. A merge
//! git refuses without conflicts leaves the tree alone. Pull never returns an
//! error; the [`PullOutcome`] says what happened.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::config::{Config, RemoteConfig, ENTITIES_DIR, INTERNAL_DIR};
use crate::git::{self, GitRepo};

const ORIGIN: &str = "origin";
const GITIGNORE_ENTRY: &str = ".memory/";
const README: &str = "# Memories\n\nPersonal knowledge store managed by memory-harness.\n\nEach file under `entities/` is one memory: YAML frontmatter followed by a markdown body.\n";
const INIT_MESSAGE: &str = "chore(memory): initialize memory store";
const RESOLVE_MESSAGE: &str = "chore(memory): auto-resolve merge conflicts (prefer remote)";

/// Settings the sync manager needs, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub root: PathBuf,
    pub branch: String,
    pub remote: Option<RemoteConfig>,
    pub timeout: Duration,
    pub author_name: String,
    pub author_email: String,
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            root: config.storage.root.clone(),
            branch: config.git.branch.clone(),
            remote: config.remote.clone(),
            timeout: config.git_timeout(),
            author_name: config.git.author_name.clone(),
            author_email: config.git.author_email.clone(),
        }
    }
}

/// What a [`SyncManager::pull`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    NoRemote,
    UpToDate,
    Merged { commits: usize },
    ConflictsResolved { files: Vec<String>, backup_dir: PathBuf },
    /// The resolver failed; local branch was reset to the remote tip.
    ResetToRemote { files: Vec<String> },
    Failed(String),
}

/// Result of a full [`SyncManager::sync`].
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pull: PullOutcome,
    pub pushed: bool,
    pub push_error: Option<String>,
}

/// Divergence from the remote branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub has_remote: bool,
    pub ahead: usize,
    pub behind: usize,
}

/// A merge that stopped on conflicts.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    pub files: Vec<String>,
    /// e.g. `origin/main`.
    pub remote_ref: String,
    /// Where strategies may keep copies of discarded versions.
    pub backup_dir: PathBuf,
}

/// How conflicted files are settled.
///
/// On success the merge must be concluded (committed).
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &str;
    async fn resolve(&self, repo: &GitRepo, conflict: &MergeConflict) -> Result<()>;
}

/// Keep the remote version of every conflicted file, backing up the local one.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferRemote;

#[async_trait]
impl ConflictResolver for PreferRemote {
    fn name(&self) -> &str {
        "prefer-remote"
    }

    async fn resolve(&self, repo: &GitRepo, conflict: &MergeConflict) -> Result<()> {
        for file in &conflict.files {
            let local = match repo.show_stage(2, file).await? {
                Some(bytes) => Some(bytes),
                None => tokio::fs::read(repo.dir().join(file)).await.ok(),
            };
            if let Some(bytes) = local {
                let dest = conflict.backup_dir.join(file);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&dest, bytes)
                    .await
                    .with_context(|| format!("Failed to back up {}", dest.display()))?;
            }

            if repo.show_stage(3, file).await?.is_some() {
                repo.run(&["checkout", "--theirs", "--", file]).await?;
            } else {
                repo.run(&["rm", "--quiet", "--", file]).await?;
            }
        }

        repo.run(&["add", "-A"]).await?;
        let out = repo
            .run_as_author(&["commit", "--quiet", "--no-verify", "-m", RESOLVE_MESSAGE])
            .await?;
        if !out.success {
            anyhow::bail!("git commit failed: {}", out.combined());
        }
        Ok(())
    }
}

pub struct SyncManager {
    repo: GitRepo,
    settings: SyncSettings,
    resolver: Arc<dyn ConflictResolver>,
}

impl SyncManager {
    pub fn new(settings: SyncSettings) -> Self {
        let repo = GitRepo::new(&settings.root, settings.timeout)
            .with_author(&settings.author_name, &settings.author_email);
        Self {
            repo,
            settings,
            resolver: Arc::new(PreferRemote),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(SyncSettings::from(config))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    pub fn has_remote(&self) -> bool {
        self.settings.remote.is_some()
    }

    fn auto_sync(&self) -> bool {
        self.settings
            .remote
            .as_ref()
            .map(|r| r.auto_sync)
            .unwrap_or(false)
    }

    fn remote_ref(&self) -> String {
        format!("{}/{}", ORIGIN, self.settings.branch)
    }

    fn internal_dir(&self) -> PathBuf {
        self.settings.root.join(INTERNAL_DIR)
    }

    /// Prepare the repository. See the module docs for the decision table.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.settings.root)
            .await
            .with_context(|| format!("Failed to create storage root: {}", self.settings.root.display()))?;

        let Some(remote) = self.settings.remote.clone() else {
            return self.init_local().await;
        };
        let url = remote.effective_url()?;

        let needs_bootstrap = if !self.repo.exists() {
            true
        } else {
            match self.repo.remote_url(ORIGIN).await? {
                Some(current) => !git::same_remote(&current, &url),
                None => false,
            }
        };

        if needs_bootstrap {
            return self.bootstrap_replace(&url).await;
        }

        self.init_local().await?;
        if self.repo.remote_url(ORIGIN).await?.is_none() {
            self.repo.add_remote(ORIGIN, &url).await?;
            tracing::info!(remote = %git::redact(&url), "registered origin");
        }
        Ok(())
    }

    async fn init_local(&self) -> Result<()> {
        if !self.repo.exists() {
            self.repo.init(&self.settings.branch).await?;
            tracing::info!(root = %self.settings.root.display(), "initialized git repository");
        }
        self.ensure_skeleton().await?;
        self.repo.commit_all(INIT_MESSAGE).await?;
        Ok(())
    }

    /// Replace the local tree with a fresh clone of `url`.
    async fn bootstrap_replace(&self, url: &str) -> Result<()> {
        let root = &self.settings.root;
        let stamp = timestamp();
        let internal = self.internal_dir();
        tokio::fs::create_dir_all(&internal).await?;

        let backup_dir = internal.join("backups").join(&stamp);
        let backed_up = backup_tree(root, &backup_dir).await?;
        if backed_up > 0 {
            tracing::warn!(
                files = backed_up,
                backup = %backup_dir.display(),
                remote = %git::redact(url),
                "remote changed, local content backed up before replacing it"
            );
        }

        wipe_tree(root).await?;

        let staging = internal.join(format!("clone-{}", stamp));
        git::shallow_clone(url, &staging, self.settings.timeout)
            .await
            .context("Bootstrap clone failed")?;
        move_contents(&staging, root).await?;
        tokio::fs::remove_dir_all(&staging).await.ok();

        let remote_ref = self.remote_ref();
        if self.repo.ref_exists(&remote_ref).await {
            self.repo
                .run(&["checkout", "--quiet", "-B", &self.settings.branch, &remote_ref])
                .await?;
        } else if !self.repo.has_commits().await {
            self.repo.set_unborn_branch(&self.settings.branch).await?;
        }

        self.ensure_skeleton().await?;
        let committed = self.repo.commit_all(INIT_MESSAGE).await?;
        if committed && self.auto_sync() {
            if let Err(e) = self.push().await {
                tracing::warn!(error = %e, "push after bootstrap failed");
            }
        }
        tracing::info!(remote = %git::redact(url), "bootstrapped from remote");
        Ok(())
    }

    /// Entities dir, internal dir, ignore file, readme. Existing files are kept.
    pub async fn ensure_skeleton(&self) -> Result<()> {
        let root = &self.settings.root;
        let entities = root.join(ENTITIES_DIR);
        tokio::fs::create_dir_all(&entities).await?;
        tokio::fs::create_dir_all(self.internal_dir()).await?;

        let keep = entities.join(".gitkeep");
        if !keep.exists() {
            tokio::fs::write(&keep, "").await?;
        }

        let gitignore = root.join(".gitignore");
        let current = tokio::fs::read_to_string(&gitignore).await.unwrap_or_default();
        if !current.lines().any(|l| l.trim() == GITIGNORE_ENTRY) {
            let mut next = current;
            if !next.is_empty() && !next.ends_with('\n') {
                next.push('\n');
            }
            next.push_str(GITIGNORE_ENTRY);
            next.push('\n');
            tokio::fs::write(&gitignore, next).await?;
        }

        let readme = root.join("README.md");
        if !readme.exists() {
            tokio::fs::write(&readme, README).await?;
        }
        Ok(())
    }

    /// Local commit, then push when a remote is configured with auto-sync.
    ///
    /// "Nothing to commit" is not an error. Push failures are logged.
    pub async fn commit(&self, message: &str) -> Result<bool> {
        let committed = self.commit_local(message).await?;
        if committed && self.auto_sync() {
            if let Err(e) = self.push().await {
                tracing::warn!(error = %e, "push failed, will retry on next sync");
            }
        }
        Ok(committed)
    }

    pub async fn commit_local(&self, message: &str) -> Result<bool> {
        let committed = self.repo.commit_all(message).await?;
        if committed {
            tracing::debug!(message, "committed");
        }
        Ok(committed)
    }

    pub async fn push(&self) -> Result<()> {
        if !self.has_remote() {
            return Ok(());
        }
        let refspec = format!("HEAD:refs/heads/{}", self.settings.branch);
        let out = self.repo.try_run(&["push", "--quiet", ORIGIN, &refspec]).await?;
        if !out.success {
            anyhow::bail!("git push failed: {}", git::redact(out.stderr.trim()));
        }
        // Keep the remote-tracking ref current so ahead/behind stay accurate.
        let _ = self.repo.try_run(&["fetch", "--quiet", ORIGIN, &self.settings.branch]).await;
        tracing::debug!("pushed");
        Ok(())
    }

    /// Fetch and integrate the remote branch. Never fails; see [`PullOutcome`].
    pub async fn pull(&self) -> PullOutcome {
        if !self.has_remote() {
            return PullOutcome::NoRemote;
        }
        match self.try_pull().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let msg = git::redact(&format!("{:#}", e));
                tracing::warn!(error = %msg, "pull failed");
                PullOutcome::Failed(msg)
            }
        }
    }

    async fn try_pull(&self) -> Result<PullOutcome> {
        let remote_ref = self.remote_ref();
        // Bootstrap clones are shallow; merging needs the full history.
        let mut fetch = vec!["fetch", "--quiet"];
        if self.repo.is_shallow() {
            fetch.push("--unshallow");
        }
        fetch.extend([ORIGIN, self.settings.branch.as_str()]);
        let out = self.repo.try_run(&fetch).await?;
        if !out.success && out.stderr.contains("couldn't find remote ref") {
            // Remote is empty or lacks the branch; the next push creates it.
            return Ok(PullOutcome::UpToDate);
        }
        if !out.success {
            anyhow::bail!("git fetch failed: {}", out.stderr.trim());
        }

        if !self.repo.ref_exists(&remote_ref).await {
            return Ok(PullOutcome::UpToDate);
        }

        if !self.repo.has_commits().await {
            self.repo.run(&["reset", "--hard", &remote_ref]).await?;
            return Ok(PullOutcome::Merged { commits: 1 });
        }

        let behind = self.repo.count_between("HEAD", &remote_ref).await?;
        if behind == 0 {
            return Ok(PullOutcome::UpToDate);
        }

        let merge = self
            .repo
            .run_as_author(&["merge", "--no-edit", "--quiet", &remote_ref])
            .await?;
        if merge.success {
            tracing::info!(commits = behind, "merged remote changes");
            return Ok(PullOutcome::Merged { commits: behind });
        }

        let files = self.repo.conflicted_files().await.unwrap_or_default();
        if files.is_empty() {
            // Refused up front, e.g. uncommitted edits would be overwritten.
            if self.repo.ref_exists("MERGE_HEAD").await {
                let _ = self.repo.try_run(&["merge", "--abort"]).await;
            }
            let msg = git::redact(&format!("merge refused: {}", merge.combined().trim()));
            tracing::warn!(error = %msg, "pull left the working tree untouched");
            return Ok(PullOutcome::Failed(msg));
        }

        let conflict = MergeConflict {
            files: files.clone(),
            remote_ref: remote_ref.clone(),
            backup_dir: self.internal_dir().join("conflicts").join(timestamp()),
        };

        match self.resolver.resolve(&self.repo, &conflict).await {
            Ok(()) => {
                tracing::warn!(
                    strategy = self.resolver.name(),
                    files = ?files,
                    backup = %conflict.backup_dir.display(),
                    "merge conflicts resolved automatically"
                );
                Ok(PullOutcome::ConflictsResolved {
                    files,
                    backup_dir: conflict.backup_dir,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "conflict resolution failed, resetting to remote");
                let _ = self.repo.try_run(&["merge", "--abort"]).await;
                match self.backup_local_changes(&remote_ref, &conflict.backup_dir).await {
                    Ok(copied) => tracing::info!(
                        copied,
                        backup = %conflict.backup_dir.display(),
                        "local changes backed up before reset"
                    ),
                    Err(backup_err) => {
                        let err = backup_err.context("could not back up local changes");
                        let msg = git::redact(&format!("{:#}", err));
                        tracing::error!(error = %msg, "not resetting to remote");
                        return Ok(PullOutcome::Failed(msg));
                    }
                }
                match self.repo.run(&["reset", "--hard", &remote_ref]).await {
                    Ok(_) => Ok(PullOutcome::ResetToRemote { files }),
                    Err(reset_err) => {
                        tracing::error!(error = %reset_err, "hard reset to remote failed");
                        Err(reset_err.context("conflict during merge could not be resolved"))
                    }
                }
            }
        }
    }

    /// Copy every file that differs locally from `remote_ref` into `dest`.
    async fn backup_local_changes(&self, remote_ref: &str, dest: &Path) -> Result<usize> {
        let mut copied = 0;
        for file in self.repo.local_changes(remote_ref).await? {
            let source = self.repo.dir().join(&file);
            if !source.is_file() {
                continue;
            }
            let target = dest.join(&file);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target)
                .await
                .with_context(|| format!("Failed to back up {}", source.display()))?;
            copied += 1;
        }
        Ok(copied)
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        if !self.has_remote() {
            return Ok(SyncStatus::default());
        }
        let remote_ref = self.remote_ref();
        if !self.repo.ref_exists(&remote_ref).await {
            let ahead = if self.repo.has_commits().await { 1 } else { 0 };
            return Ok(SyncStatus {
                has_remote: true,
                ahead,
                behind: 0,
            });
        }
        if !self.repo.has_commits().await {
            return Ok(SyncStatus {
                has_remote: true,
                ahead: 0,
                behind: 1,
            });
        }
        Ok(SyncStatus {
            has_remote: true,
            ahead: self.repo.count_between(&remote_ref, "HEAD").await?,
            behind: self.repo.count_between("HEAD", &remote_ref).await?,
        })
    }

    /// Pull, then push if the local branch is ahead.
    pub async fn sync(&self) -> SyncReport {
        let pull = self.pull().await;
        if !self.has_remote() {
            return SyncReport {
                pull,
                pushed: false,
                push_error: None,
            };
        }

        let ahead = match self.status().await {
            Ok(status) => status.ahead > 0,
            Err(e) => {
                tracing::warn!(error = %e, "could not compute sync status");
                false
            }
        };
        if !ahead {
            return SyncReport {
                pull,
                pushed: false,
                push_error: None,
            };
        }

        match self.push().await {
            Ok(()) => SyncReport {
                pull,
                pushed: true,
                push_error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "push failed");
                SyncReport {
                    pull,
                    pushed: false,
                    push_error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Interval timer that keeps pulling in the background.
pub struct BackgroundSync {
    sync: Arc<SyncManager>,
    interval: Duration,
    running: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl BackgroundSync {
    pub fn new(sync: Arc<SyncManager>, interval: Duration) -> Self {
        Self {
            sync,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Start the timer. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let sync = Arc::clone(&self.sync);
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = sync.pull().await;
                        tracing::debug!(?outcome, "background pull");
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *running = Some((tx, handle));
        tracing::info!(interval_secs = period.as_secs(), "background sync started");
    }

    /// Stop the timer and wait for an in-flight pull to finish. Idempotent.
    pub async fn stop(&self) {
        let taken = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((tx, handle)) = taken {
            let _ = tx.send(true);
            let _ = handle.await;
            tracing::info!("background sync stopped");
        }
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

fn is_reserved(name: &std::ffi::OsStr) -> bool {
    name == INTERNAL_DIR || name == ".git"
}

/// Copy every file outside `.memory/` and `.git/` into `dest`. Returns the file count.
async fn backup_tree(root: &Path, dest: &Path) -> Result<usize> {
    let root = root.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut copied = 0;
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && is_reserved(e.file_name())));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&root)?;
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to back up {}", entry.path().display()))?;
            copied += 1;
        }
        Ok(copied)
    })
    .await?
}

/// Remove everything in `root` except `.memory/`, including `.git/`.
async fn wipe_tree(root: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name() == INTERNAL_DIR {
            continue;
        }
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        }
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Move the direct children of `from` into `to`.
async fn move_contents(from: &Path, to: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(from).await?;
    while let Some(entry) = entries.next_entry().await? {
        let target = to.join(entry.file_name());
        tokio::fs::rename(entry.path(), &target)
            .await
            .with_context(|| format!("Failed to move clone into {}", target.display()))?;
    }
    Ok(())
}

//! Thin async wrapper over the `git` command-line tool.
//!
//! Every invocation runs in the repository directory with
//! `GIT_TERMINAL_PROMPT=0` (never block on a credential prompt), is killed
//! if its future is dropped, and is bounded by the configured timeout.
//! Commits pass the author identity with `-c user.name=… -c user.email=…`
//! so they work on machines without a global git identity.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout.trim(), self.stderr.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    timeout: Duration,
    author_name: String,
    author_email: String,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            author_name: "memory-harness".to_string(),
            author_email: "memory-harness@localhost".to_string(),
        }
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.join(".git").exists()
    }

    /// Run git and capture output without judging the exit status.
    pub async fn try_run(&self, args: &[&str]) -> Result<GitOutput> {
        run_git(&self.dir, args, self.timeout).await
    }

    /// Run git, failing on a non-zero exit status.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let out = self.try_run(args).await?;
        if !out.success {
            bail!("git {} failed: {}", args.join(" "), out.stderr.trim());
        }
        Ok(out.stdout)
    }

    /// Run git with the configured author identity.
    pub async fn run_as_author(&self, args: &[&str]) -> Result<GitOutput> {
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        let mut full: Vec<&str> = vec!["-c", &name, "-c", &email];
        full.extend_from_slice(args);
        self.try_run(&full).await
    }

    /// `git init` with `branch` as the unborn HEAD.
    pub async fn init(&self, branch: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create repository directory: {}", self.dir.display()))?;
        self.run(&["init", "--quiet"]).await?;
        self.set_unborn_branch(branch).await
    }

    /// Point HEAD at `branch`. Only meaningful before the first commit.
    pub async fn set_unborn_branch(&self, branch: &str) -> Result<()> {
        let head = format!("refs/heads/{}", branch);
        self.run(&["symbolic-ref", "HEAD", &head]).await?;
        Ok(())
    }

    pub async fn has_commits(&self) -> bool {
        self.try_run(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .map(|o| o.success)
            .unwrap_or(false)
    }

    pub async fn ref_exists(&self, reference: &str) -> bool {
        self.try_run(&["rev-parse", "--verify", "--quiet", reference])
            .await
            .map(|o| o.success)
            .unwrap_or(false)
    }

    /// URL of `name`, or `None` when the remote is not registered.
    pub async fn remote_url(&self, name: &str) -> Result<Option<String>> {
        let out = self.try_run(&["remote", "get-url", name]).await?;
        if !out.success {
            return Ok(None);
        }
        Ok(Some(out.stdout.trim().to_string()))
    }

    pub async fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.run(&["remote", "add", name, url]).await?;
        Ok(())
    }

    pub fn is_shallow(&self) -> bool {
        self.dir.join(".git").join("shallow").exists()
    }

    pub async fn is_clean(&self) -> Result<bool> {
        let status = self.run(&["status", "--porcelain"]).await?;
        Ok(status.trim().is_empty())
    }

    /// Stage everything and commit. `Ok(false)` when there was nothing to commit.
    pub async fn commit_all(&self, message: &str) -> Result<bool> {
        self.run(&["add", "-A"]).await?;
        if self.is_clean().await? {
            return Ok(false);
        }
        let out = self
            .run_as_author(&["commit", "--quiet", "--no-verify", "-m", message])
            .await?;
        if !out.success {
            if out.combined().contains("nothing to commit") {
                return Ok(false);
            }
            bail!("git commit failed: {}", out.combined());
        }
        Ok(true)
    }

    /// Number of commits reachable from `to` but not from `from`.
    pub async fn count_between(&self, from: &str, to: &str) -> Result<usize> {
        let range = format!("{}..{}", from, to);
        let out = self.run(&["rev-list", "--count", &range]).await?;
        out.trim()
            .parse::<usize>()
            .with_context(|| format!("unexpected rev-list output: {}", out.trim()))
    }

    /// Paths with unresolved merge conflicts.
    pub async fn conflicted_files(&self) -> Result<Vec<String>> {
        let out = self
            .run(&["diff", "--name-only", "--diff-filter=U", "-z"])
            .await?;
        Ok(out
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Paths that exist only locally relative to `base`: changes committed
    /// since the merge base, uncommitted edits and untracked files.
    pub async fn local_changes(&self, base: &str) -> Result<Vec<String>> {
        let range = format!("{}...HEAD", base);
        let listings: [&[&str]; 3] = [
            &["diff", "--name-only", "-z", range.as_str()],
            &["diff", "--name-only", "-z", "HEAD"],
            &["ls-files", "--others", "--exclude-standard", "-z"],
        ];
        let mut paths = BTreeSet::new();
        for args in listings {
            let out = self.run(args).await?;
            paths.extend(out.split('\0').filter(|p| !p.is_empty()).map(str::to_string));
        }
        Ok(paths.into_iter().collect())
    }

    /// Blob content of `path` at index stage 1 (base), 2 (ours), or 3 (theirs).
    pub async fn show_stage(&self, stage: u8, path: &str) -> Result<Option<Vec<u8>>> {
        let spec = format!(":{}:{}", stage, path);
        let out = run_git_bytes(&self.dir, &["show", &spec], self.timeout).await?;
        Ok(out)
    }
}

/// `git clone --depth 1 <url> <dest>` (tips of every branch), run from `dest`'s parent.
pub async fn shallow_clone(url: &str, dest: &Path, timeout: Duration) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("clone destination has no parent: {}", dest.display()))?;
    tokio::fs::create_dir_all(parent).await?;
    let dest_str = dest.to_string_lossy().to_string();
    let out = run_git(
        parent,
        &["clone", "--quiet", "--depth", "1", "--no-single-branch", url, &dest_str],
        timeout,
    )
    .await?;
    if !out.success {
        bail!("git clone failed: {}", redact(out.stderr.trim()));
    }
    Ok(())
}

/// Strip userinfo from a URL so credentials never reach logs or comparisons.
pub fn redact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("://") {
        let (head, tail) = rest.split_at(pos + 3);
        out.push_str(head);
        let end = tail
            .find(|c: char| c == '/' || c.is_whitespace())
            .unwrap_or(tail.len());
        let authority = &tail[..end];
        match authority.rfind('@') {
            Some(at) => out.push_str(&authority[at + 1..]),
            None => out.push_str(authority),
        }
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

/// Compare two remote URLs ignoring credentials, a trailing slash, and `.git`.
pub fn same_remote(a: &str, b: &str) -> bool {
    fn canonical(url: &str) -> String {
        let url = redact(url.trim());
        let url = url.trim_end_matches('/');
        url.strip_suffix(".git").unwrap_or(url).to_string()
    }
    canonical(a) == canonical(b)
}

fn command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn run_git(dir: &Path, args: &[&str], timeout: Duration) -> Result<GitOutput> {
    let output = tokio::time::timeout(timeout, command(dir, args).output())
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "git {} timed out after {}s",
                args.first().copied().unwrap_or_default(),
                timeout.as_secs()
            )
        })?
        .with_context(|| "Failed to execute git. Is git installed?")?;

    Ok(GitOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

async fn run_git_bytes(dir: &Path, args: &[&str], timeout: Duration) -> Result<Option<Vec<u8>>> {
    let output = tokio::time::timeout(timeout, command(dir, args).output())
        .await
        .map_err(|_| anyhow::anyhow!("git show timed out after {}s", timeout.as_secs()))?
        .with_context(|| "Failed to execute git. Is git installed?")?;
    Ok(output.status.success().then_some(output.stdout))
}

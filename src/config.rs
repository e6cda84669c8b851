use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the internal, git-ignored directory under the storage root.
pub const INTERNAL_DIR: &str = ".memory";
/// Directory under the storage root that holds entity files.
pub const ENTITIES_DIR: &str = "entities";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            branch: default_branch(),
            timeout_secs: default_git_timeout_secs(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_git_timeout_secs() -> u64 {
    60
}
fn default_author_name() -> String {
    "memory-harness".to_string()
}
fn default_author_email() -> String {
    "memory-harness@localhost".to_string()
}

/// How credentials reach the remote.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// URL used as-is; ssh URLs rely on the ambient agent.
    #[default]
    None,
    /// Token read from `token_env` and embedded in an https URL.
    Token,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub auth: AuthMode,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_sync_interval_secs() -> u64 {
    300
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: AuthMode::None,
            token_env: default_token_env(),
            auto_sync: true,
            sync_interval_secs: default_sync_interval_secs(),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// The URL handed to git, with credentials applied per [`AuthMode`].
    pub fn effective_url(&self) -> Result<String> {
        match self.auth {
            AuthMode::None => Ok(self.url.clone()),
            AuthMode::Token => {
                let token = std::env::var(&self.token_env).with_context(|| {
                    format!("remote.auth = \"token\" but {} is not set", self.token_env)
                })?;
                let rest = self.url.strip_prefix("https://").ok_or_else(|| {
                    anyhow::anyhow!("remote.auth = \"token\" requires an https:// URL")
                })?;
                let rest = rest.split_once('@').map(|(_, host)| host).unwrap_or(rest);
                Ok(format!("https://{}@{}", token, rest))
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_true")]
    pub auto_index: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { auto_index: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible servers, remote Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_exact_match_boost")]
    pub exact_match_boost: f64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            exact_match_boost: default_exact_match_boost(),
            default_limit: default_limit(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_exact_match_boost() -> f64 {
    0.3
}
fn default_limit() -> usize {
    10
}

impl Config {
    /// All-defaults configuration rooted at `root`: local git, auto-commit,
    /// no remote, embeddings disabled.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig { root: root.into() },
            git: GitConfig::default(),
            remote: None,
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }

    pub fn entities_dir(&self) -> PathBuf {
        self.storage.root.join(ENTITIES_DIR)
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.storage.root.join(INTERNAL_DIR)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.root.as_os_str().is_empty() {
            bail!("storage.root must not be empty");
        }

        if self.git.branch.trim().is_empty() {
            bail!("git.branch must not be empty");
        }
        if self.git.timeout_secs == 0 {
            bail!("git.timeout_secs must be > 0");
        }

        if let Some(ref remote) = self.remote {
            if remote.url.trim().is_empty() {
                bail!("remote.url must not be empty");
            }
            if remote.sync_interval_secs == 0 {
                bail!("remote.sync_interval_secs must be >= 1");
            }
            if remote.auth == AuthMode::Token && !remote.url.starts_with("https://") {
                bail!("remote.auth = \"token\" requires an https:// URL");
            }
        }

        if !(0.0..=1.0).contains(&self.retrieval.semantic_weight) {
            bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.retrieval.exact_match_boost) {
            bail!("retrieval.exact_match_boost must be in [0.0, 1.0]");
        }
        if self.retrieval.default_limit < 1 {
            bail!("retrieval.default_limit must be >= 1");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative storage roots resolve against the config file's directory.
    if config.storage.root.is_relative() {
        if let Some(parent) = path.parent() {
            config.storage.root = parent.join(&config.storage.root);
        }
    }

    config.validate()?;
    Ok(config)
}

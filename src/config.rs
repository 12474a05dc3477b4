//! Settings document and data directory resolution.
//!
//! Settings live in a TOML file outside the store so they survive a data
//! directory move. Changing the storage location does not move anything
//! immediately: it records a pending migration that is applied at the next
//! startup, before the store is opened.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Local,
    /// Data directory lives in an external sync folder chosen by the user.
    External,
}

/// A one-shot "move the whole data directory" request, applied at the next
/// startup before the store is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMove {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,

    #[serde(default)]
    pub external_path: Option<PathBuf>,

    #[serde(default)]
    pub pending_move: Option<PendingMove>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AiProviderType {
    /// Local caption station speaking the /v1/caption REST contract.
    #[default]
    LocalStation,
    /// Any OpenAI-compatible chat/embeddings endpoint.
    OpenAiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProviderType,

    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Operator switch for the vector search path. Off by default; lexical
    /// search works regardless.
    #[serde(default)]
    pub semantic_search: bool,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_ai_endpoint() -> String {
    "http://127.0.0.1:2020".to_string()
}

fn default_ai_model() -> String {
    "station-default".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderType::default(),
            endpoint: default_ai_endpoint(),
            api_key: None,
            model: default_ai_model(),
            semantic_search: false,
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: f64,

    /// Re-queue previously failed annotations when the daemon starts.
    #[serde(default = "default_retry_failed")]
    pub retry_failed_on_start: bool,
}

fn default_poll_seconds() -> f64 {
    1.0
}

fn default_retry_failed() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_seconds: default_poll_seconds(),
            retry_failed_on_start: default_retry_failed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Longest edge of generated thumbnails, in pixels.
    #[serde(default = "default_thumb_max_dim")]
    pub max_dimension: u32,
}

fn default_thumb_max_dim() -> u32 {
    512
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_thumb_max_dim(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("easel")
            .join("config.toml")
    }

    /// The data directory the store should use this run, given the configured
    /// storage mode. Does not apply pending moves; see
    /// [`apply_pending_move`].
    pub fn resolve_data_dir(&self) -> PathBuf {
        if self.storage.mode == StorageMode::External {
            if let Some(p) = &self.storage.external_path {
                return p.clone();
            }
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("easel")
            .join("data")
    }

    /// Request a data-directory move to be applied at next startup.
    pub fn schedule_move(&mut self, from: PathBuf, to: PathBuf) {
        self.storage.pending_move = Some(PendingMove { from, to });
    }
}

/// Apply a pending data-directory move, if one is recorded.
///
/// Must run before the store is opened so a live database is never moved.
/// Returns an override directory when the move failed and the old location
/// should be kept for this run; otherwise the caller uses
/// `config.resolve_data_dir()`.
pub fn apply_pending_move(config: &mut Config, config_path: &Path) -> Option<PathBuf> {
    let pending = config.storage.pending_move.clone()?;
    let from = pending.from;
    let to = pending.to;

    if from == to || !from.exists() {
        config.storage.pending_move = None;
        let _ = config.save_to(config_path);
        return None;
    }

    // A non-empty destination is backed up rather than merged into.
    if to.exists() && !is_dir_empty(&to) {
        let ts = chrono::Utc::now().timestamp();
        let name = to
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("data")
            .to_string();
        let backup = to
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join(format!("{}-backup-{}", name, ts));
        let _ = std::fs::rename(&to, &backup);
    }

    if let Some(parent) = to.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match move_dir(&from, &to) {
        Ok(()) => {
            info!(from = %from.display(), to = %to.display(), "Data directory moved");
            config.storage.pending_move = None;
            let _ = config.save_to(config_path);
            None
        }
        Err(e) => {
            // Keep using the old location for this run so the library
            // isn't "missing"; the move stays pending.
            warn!(error = %e, "Data directory move failed; keeping old location");
            Some(from)
        }
    }
}

fn is_dir_empty(p: &Path) -> bool {
    match std::fs::read_dir(p) {
        Ok(mut it) => it.next().is_none(),
        Err(_) => true,
    }
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let ft = entry.file_type()?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if ft.is_dir() {
            copy_dir_all(&src, &dst)?;
        } else if ft.is_file() {
            std::fs::copy(&src, &dst)?;
        }
    }
    Ok(())
}

fn move_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    // Fast path: same volume rename.
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_dir_all(from, to)?;
    std::fs::remove_dir_all(from)?;
    Ok(())
}

//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `$MINDMAP_CONFIG` environment variable
//! 2. `~/.config/mindmap/config.toml`
//! 3. Built-in defaults (everything is optional)

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use mindmap_core::EngineConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

/// Snapshot storage settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Snapshot path. Default: platform-specific data dir.
    pub path: Option<String>,
}

/// Chat-completions endpoint (any OpenAI-compatible API).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings`; needs an explicit `base_url`.
    Api,
    /// In-process model, needs the `embeddings` feature.
    Local,
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        if cfg!(feature = "embeddings") {
            Self::Local
        } else {
            Self::Api
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProvider,
    /// Defaults depend on the provider, see [`EmbeddingsConfig::model`].
    pub model: Option<String>,
    /// Required for the `api` provider. The chat endpoint is not assumed to
    /// serve embeddings.
    pub base_url: Option<String>,
    /// Defaults to `[llm] api_key_env`.
    pub api_key_env: Option<String>,
}

// --- Defaults ---

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            api_key_env: "DEEPSEEK_API_KEY".into(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 30,
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: None,
            base_url: None,
            api_key_env: None,
        }
    }
}

impl EmbeddingsConfig {
    pub fn model(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(m), _) => m.as_str(),
            (None, EmbeddingProvider::Api) => "text-embedding-3-small",
            (None, EmbeddingProvider::Local) => "all-minilm-l6-v2",
        }
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config() -> Result<Config> {
    let path = config_path();

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MINDMAP_CONFIG") {
        return Some(PathBuf::from(p));
    }

    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("mindmap").join("config.toml"))
}

/// Show the active config path (for `mindmap config`).
pub fn show_config_path() -> String {
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}

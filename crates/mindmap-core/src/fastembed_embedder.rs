use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::embedder::Embedder;
use crate::error::{MindmapError, MindmapResult};

/// Local embedding model, downloaded and loaded on first use.
pub struct FastEmbedder {
    model: OnceLock<TextEmbedding>,
    init_lock: Mutex<()>,
    kind: EmbeddingModel,
    dimensions: usize,
}

impl FastEmbedder {
    pub fn new() -> Self {
        Self::with_model(EmbeddingModel::BGESmallENV15Q, 384)
    }

    pub fn with_model(kind: EmbeddingModel, dimensions: usize) -> Self {
        Self {
            model: OnceLock::new(),
            init_lock: Mutex::new(()),
            kind,
            dimensions,
        }
    }

    /// Resolve a model name from the config file. Only the small English
    /// models are offered.
    pub fn from_name(name: &str) -> MindmapResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bge-small-en-v1.5" | "bge-small" => Ok(Self::new()),
            "all-minilm-l6-v2" | "minilm" => Ok(Self::with_model(EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-base-en-v1.5" | "bge-base" => Ok(Self::with_model(EmbeddingModel::BGEBaseENV15, 768)),
            other => Err(MindmapError::Config(format!("unknown local embedding model: {other}"))),
        }
    }

    fn get_model(&self) -> MindmapResult<&TextEmbedding> {
        if let Some(m) = self.model.get() {
            return Ok(m);
        }
        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| MindmapError::Embedding("embedding model lock poisoned".into()))?;
        if let Some(m) = self.model.get() {
            return Ok(m);
        }

        let mut options = InitOptions::new(self.kind.clone()).with_show_download_progress(true);
        if let Some(dir) = cache_dir() {
            options = options.with_cache_dir(dir);
        }
        info!(model = ?self.kind, "loading local embedding model");
        let model = TextEmbedding::try_new(options)
            .map_err(|e| MindmapError::Embedding(format!("failed to init model: {e}")))?;
        let _ = self.model.set(model);
        self.model
            .get()
            .ok_or_else(|| MindmapError::Embedding("embedding model failed to initialize".into()))
    }
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "mindmap", "mindmap").map(|d| d.cache_dir().join("models"))
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> MindmapResult<Vec<f32>> {
        let model = self.get_model()?;
        let results = model
            .embed(vec![text], None)
            .map_err(|e| MindmapError::Embedding(e.to_string()))?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| MindmapError::Embedding("empty embedding result".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> MindmapResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.get_model()?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| MindmapError::Embedding(e.to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

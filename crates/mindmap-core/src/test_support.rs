//! Deterministic stand-ins for the model capabilities.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::embedder::Embedder;
use crate::error::{MindmapError, MindmapResult};
use crate::generator::Generator;

type ReplyFn = dyn Fn(&str, bool) -> MindmapResult<String> + Send + Sync;

/// Generator backed by a closure. Clones share the call log, so a test can
/// keep a handle after boxing one into an orchestrator.
#[derive(Clone)]
pub struct FnGenerator {
    reply: Arc<ReplyFn>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl FnGenerator {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&str, bool) -> MindmapResult<String> + Send + Sync + 'static,
    {
        Self {
            reply: Arc::new(reply),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Generator for FnGenerator {
    fn generate(&self, prompt: &str, structured: bool) -> MindmapResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.reply)(prompt, structured)
    }
}

/// Embedder returning the vector of the first key found in the text, and an
/// orthogonal fallback otherwise.
#[derive(Clone)]
pub struct KeyedEmbedder {
    table: Arc<Vec<(String, Vec<f32>)>>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

pub const FALLBACK_VECTOR: [f32; 2] = [0.0, 1.0];

impl KeyedEmbedder {
    pub fn new(table: Vec<(&str, Vec<f32>)>) -> Self {
        Self {
            table: Arc::new(
                table
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for KeyedEmbedder {
    fn embed(&self, text: &str) -> MindmapResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MindmapError::Embedding("embedder offline".into()));
        }
        Ok(self
            .table
            .iter()
            .find(|(key, _)| text.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| FALLBACK_VECTOR.to_vec()))
    }

    fn embed_batch(&self, texts: &[&str]) -> MindmapResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        FALLBACK_VECTOR.len()
    }
}

use serde_json::{Map, Value};

use crate::error::MindmapResult;
use crate::repair::parse_structured_reply;

/// Text-generation backend.
pub trait Generator: Send + Sync {
    /// Generate a reply for `prompt`. When `structured` is set the backend is
    /// asked for a single JSON object, which may still come back malformed.
    fn generate(&self, prompt: &str, structured: bool) -> MindmapResult<String>;

    /// Generate a structured reply and run it through the repair pipeline.
    fn generate_structured(&self, prompt: &str) -> MindmapResult<Map<String, Value>> {
        let raw = self.generate(prompt, true)?;
        parse_structured_reply(&raw)
    }
}

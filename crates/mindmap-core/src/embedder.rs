use crate::error::MindmapResult;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> MindmapResult<Vec<f32>>;
    fn embed_batch(&self, texts: &[&str]) -> MindmapResult<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}

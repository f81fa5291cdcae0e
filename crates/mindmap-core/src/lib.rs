pub mod block;
pub mod classification;
pub mod classifier;
pub mod config;
pub mod context;
pub mod embedder;
pub mod error;
#[cfg(feature = "embeddings")]
pub mod fastembed_embedder;
pub mod generator;
pub mod graph;
pub mod lifecycle;
pub mod message;
pub mod mindmap;
pub mod orchestrator;
pub mod prompts;
pub mod repair;
mod serde_compat;
pub mod similarity;
pub mod store;
pub mod viz;

#[cfg(test)]
mod test_support;

pub use block::{Block, BlockRelation};
pub use classification::{BlockAction, BlockClassification, BlockSeed, ClassificationReply};
pub use classifier::IntentClassifier;
pub use config::{EngineConfig, OnFailure, SimilarityBand, Thresholds};
pub use embedder::Embedder;
pub use error::{MindmapError, MindmapResult};
#[cfg(feature = "embeddings")]
pub use fastembed_embedder::FastEmbedder;
pub use generator::Generator;
pub use graph::ConversationGraph;
pub use lifecycle::BlockLifecycle;
pub use message::{Message, Role};
pub use mindmap::{GraphSummary, Mindmap};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use repair::parse_structured_reply;
pub use similarity::similarity;
pub use store::{InMemoryStore, MindmapStore, Updater};
pub use viz::{to_visual_graph, VisualGraph, VisualLink, VisualNode};

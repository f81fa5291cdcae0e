//! Block creation and summarization.

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::block::Block;
use crate::classification::{BlockSeed, PLACEHOLDER_TITLE};
use crate::config::{EngineConfig, OnFailure};
use crate::context::build_summary_context;
use crate::embedder::Embedder;
use crate::error::{MindmapError, MindmapResult};
use crate::generator::Generator;
use crate::graph::ConversationGraph;
use crate::prompts;

const MAX_TITLE_WORDS: usize = 8;
const MAX_TITLE_CHARS: usize = 60;
const DEFAULT_ROOT_INTENT: &str = "Initial conversation";

pub struct BlockLifecycle<'a> {
    generator: &'a dyn Generator,
    embedder: &'a dyn Embedder,
    config: &'a EngineConfig,
}

impl<'a> BlockLifecycle<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        embedder: &'a dyn Embedder,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            generator,
            embedder,
            config,
        }
    }

    /// New parentless block whose title and intent are extracted from the
    /// first message of a thread.
    ///
    /// If extraction fails the title is derived from the message itself; an
    /// embedding failure is returned as an error.
    pub fn create_root(&self, seed_message: &str) -> MindmapResult<Block> {
        let seed = match self.generator.generate_structured(&prompts::extract_intent(seed_message)) {
            Ok(obj) => seed_from_extraction(&obj),
            Err(e) => {
                warn!("intent extraction failed, deriving title from message: {e}");
                BlockSeed::new(derive_title(seed_message), truncate_chars(seed_message, 200))
            }
        };
        let embedding = self.embedder.embed(&seed.intent)?;
        let block = Block::new(None, seed.title, seed.intent, embedding);
        info!(block = %block.id, title = %block.title, "created root block");
        Ok(block)
    }

    /// New block under `parent`. The parent's children list is updated here;
    /// the caller still inserts the block into its graph.
    pub fn create_child(&self, parent: &mut Block, title: &str, intent: &str) -> MindmapResult<Block> {
        let embedding = self.embedder.embed(intent)?;
        let block = Block::new(
            Some(parent.id.clone()),
            title.to_string(),
            intent.to_string(),
            embedding,
        );
        parent.add_child(&block.id);
        info!(block = %block.id, parent = %parent.id, title = %block.title, "created child block");
        Ok(block)
    }

    /// Summarize a block from its full history, overwriting its summary,
    /// key points, open questions, and (when suggested) title.
    ///
    /// On error the block is left untouched.
    pub fn summarize(&self, graph: &mut ConversationGraph, block_id: &str) -> MindmapResult<()> {
        let prompt = {
            let block = graph
                .block(block_id)
                .ok_or_else(|| MindmapError::BlockNotFound(block_id.to_string()))?;
            prompts::block_summary(&block.intent, &build_summary_context(graph, block))
        };

        let obj = self.generator.generate_structured(&prompt)?;
        let update = SummaryUpdate::from_object(&obj)?;

        let block = graph
            .block_mut(block_id)
            .ok_or_else(|| MindmapError::BlockNotFound(block_id.to_string()))?;
        block.summary = update.summary;
        block.key_points = update.key_points;
        block.open_questions = update.open_questions;
        if let Some(title) = update.title_suggestion {
            block.title = title;
        }
        info!(block = %block.id, title = %block.title, "block summarized");
        Ok(())
    }

    /// Summarize once the block reaches the configured message count, but
    /// only if it has no summary yet. Returns whether a summary was written.
    pub fn maybe_auto_summarize(
        &self,
        graph: &mut ConversationGraph,
        block_id: &str,
    ) -> MindmapResult<bool> {
        let due = graph.block(block_id).is_some_and(|b| {
            b.conversation_refs.len() >= self.config.auto_summarize_after && b.summary.is_empty()
        });
        if !due {
            return Ok(false);
        }

        match self.summarize(graph, block_id) {
            Ok(()) => Ok(true),
            Err(e) if e.is_external() && self.config.summary_failure == OnFailure::ContinueWithDefault => {
                warn!(block = %block_id, "auto-summarize failed, block left unchanged: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

fn seed_from_extraction(obj: &Map<String, Value>) -> BlockSeed {
    let field = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    BlockSeed::new(
        field("title").unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
        field("intent").unwrap_or_else(|| DEFAULT_ROOT_INTENT.to_string()),
    )
}

struct SummaryUpdate {
    summary: String,
    key_points: Vec<String>,
    open_questions: Vec<String>,
    title_suggestion: Option<String>,
}

impl SummaryUpdate {
    fn from_object(obj: &Map<String, Value>) -> MindmapResult<Self> {
        let summary = obj
            .get("summary")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MindmapError::MalformedReply("summary reply has no summary".into()))?
            .to_string();

        Ok(Self {
            summary,
            key_points: string_list(obj.get("key_points")),
            open_questions: string_list(obj.get("open_questions")),
            title_suggestion: obj
                .get("title_suggestion")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
                .map(str::to_string),
        })
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Title heuristics
// ---------------------------------------------------------------------------

/// Short title from free text: at most 8 words and 60 characters, trailing
/// punctuation dropped, first letter capitalized. Empty input gives
/// "Untitled".
pub fn derive_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(MAX_TITLE_WORDS).collect();
    let mut title = String::new();
    for word in words {
        let candidate_len = title.chars().count() + usize::from(!title.is_empty()) + word.chars().count();
        if candidate_len > MAX_TITLE_CHARS {
            if title.is_empty() {
                title = word.chars().take(MAX_TITLE_CHARS).collect();
            }
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
    }

    let trimmed = title
        .trim_end_matches(|c: char| !c.is_alphanumeric() && c != ')' && c != '"')
        .trim_start_matches(|c: char| !c.is_alphanumeric() && c != '(' && c != '"');
    if trimmed.is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }

    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => PLACEHOLDER_TITLE.to_string(),
    }
}

/// Seed for a deepen branch when the classifier supplied none. The title is
/// `<parent>: <focus>`, capped at the title length.
pub fn deepen_seed(parent_title: &str, message: &str) -> BlockSeed {
    let parent = parent_title.trim();
    let focus = derive_title(message);
    let title = if focus == PLACEHOLDER_TITLE {
        derive_title(&format!("{parent} in depth"))
    } else if parent.is_empty() {
        focus
    } else {
        truncate_chars(&format!("{parent}: {focus}"), MAX_TITLE_CHARS - 3)
    };
    BlockSeed::new(
        title,
        format!("Go deeper into {parent_title}: {}", truncate_chars(message, 120)),
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::test_support::{FnGenerator, KeyedEmbedder};

    const SUMMARY_REPLY: &str = r#"{"summary": "Covered AIMD.", "key_points": ["additive increase", ""],
        "open_questions": ["BBR?"], "title_suggestion": "AIMD basics"}"#;

    fn graph_with_messages(n: usize) -> (ConversationGraph, String) {
        let mut g = ConversationGraph::new();
        let root = Block::new(None, "TCP".into(), "Learn TCP".into(), vec![1.0]);
        let id = root.id.clone();
        g.add_block(root).unwrap();
        for i in 0..n {
            g.record_message(&id, Role::User, &format!("m{i}")).unwrap();
        }
        (g, id)
    }

    #[test]
    fn test_create_root_uses_extraction() {
        let gen = FnGenerator::new(|prompt, _| {
            assert!(prompt.contains("NEW THREAD"));
            Ok(r#"{"intent": "Understand congestion control", "title": "TCP Congestion"}"#.into())
        });
        let emb = KeyedEmbedder::new(vec![("congestion", vec![1.0, 0.0])]);
        let config = EngineConfig::default();
        let lc = BlockLifecycle::new(&gen, &emb, &config);

        let root = lc.create_root("Explain TCP congestion control").unwrap();
        assert!(root.is_root());
        assert_eq!(root.title, "TCP Congestion");
        assert_eq!(root.intent, "Understand congestion control");
        assert_eq!(root.intent_embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn test_create_root_defaults_missing_fields() {
        let gen = FnGenerator::new(|_, _| Ok("{}".into()));
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig::default();
        let root = BlockLifecycle::new(&gen, &emb, &config)
            .create_root("hi")
            .unwrap();
        assert_eq!(root.title, "Untitled");
        assert_eq!(root.intent, "Initial conversation");
    }

    #[test]
    fn test_create_root_survives_extraction_failure() {
        let gen = FnGenerator::new(|_, _| Err(MindmapError::Generation("down".into())));
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig::default();
        let root = BlockLifecycle::new(&gen, &emb, &config)
            .create_root("explain tcp congestion control please?")
            .unwrap();
        assert_eq!(root.title, "Explain tcp congestion control please");
    }

    #[test]
    fn test_create_child_links_parent() {
        let gen = FnGenerator::new(|_, _| Ok("{}".into()));
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig::default();
        let lc = BlockLifecycle::new(&gen, &emb, &config);

        let mut parent = Block::new(None, "p".into(), "p".into(), vec![]);
        let child = lc.create_child(&mut parent, "Slow start", "Explain slow start").unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(parent.children, vec![child.id.clone()]);
        assert_eq!(gen.call_count(), 0);
        assert_eq!(emb.call_count(), 1);
    }

    #[test]
    fn test_summarize_overwrites_fields() {
        let gen = FnGenerator::new(|prompt, _| {
            assert!(prompt.contains("BLOCK SUMMARY REQUEST"));
            assert!(prompt.contains("User: m0"));
            Ok(SUMMARY_REPLY.into())
        });
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig::default();
        let (mut g, id) = graph_with_messages(2);

        BlockLifecycle::new(&gen, &emb, &config)
            .summarize(&mut g, &id)
            .unwrap();
        let block = g.block(&id).unwrap();
        assert_eq!(block.summary, "Covered AIMD.");
        assert_eq!(block.key_points, vec!["additive increase"]);
        assert_eq!(block.open_questions, vec!["BBR?"]);
        assert_eq!(block.title, "AIMD basics");
    }

    #[test]
    fn test_summarize_null_title_keeps_title() {
        let gen = FnGenerator::new(|_, _| {
            Ok(r#"{"summary": "s", "key_points": [], "open_questions": [], "title_suggestion": null}"#.into())
        });
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig::default();
        let (mut g, id) = graph_with_messages(1);
        BlockLifecycle::new(&gen, &emb, &config)
            .summarize(&mut g, &id)
            .unwrap();
        assert_eq!(g.block(&id).unwrap().title, "TCP");
    }

    #[test]
    fn test_summarize_failure_leaves_block_unchanged() {
        let gen = FnGenerator::new(|_, _| Ok(r#"{"key_points": ["x"]}"#.into()));
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig::default();
        let (mut g, id) = graph_with_messages(1);
        let before = g.block(&id).unwrap().clone();

        let err = BlockLifecycle::new(&gen, &emb, &config)
            .summarize(&mut g, &id)
            .unwrap_err();
        assert!(matches!(err, MindmapError::MalformedReply(_)));
        assert_eq!(g.block(&id).unwrap(), &before);
    }

    #[test]
    fn test_auto_summarize_threshold_and_idempotence() {
        let gen = FnGenerator::new(|_, _| Ok(SUMMARY_REPLY.into()));
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig {
            auto_summarize_after: 4,
            ..EngineConfig::default()
        };
        let lc = BlockLifecycle::new(&gen, &emb, &config);

        let (mut g, id) = graph_with_messages(3);
        assert!(!lc.maybe_auto_summarize(&mut g, &id).unwrap());
        assert_eq!(gen.call_count(), 0);

        g.record_message(&id, Role::Assistant, "fourth").unwrap();
        assert!(lc.maybe_auto_summarize(&mut g, &id).unwrap());
        assert!(!lc.maybe_auto_summarize(&mut g, &id).unwrap());
        assert_eq!(gen.call_count(), 1);
    }

    #[test]
    fn test_auto_summarize_swallows_external_failure() {
        let gen = FnGenerator::new(|_, _| Err(MindmapError::Generation("down".into())));
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig {
            auto_summarize_after: 1,
            ..EngineConfig::default()
        };
        let (mut g, id) = graph_with_messages(2);
        let summarized = BlockLifecycle::new(&gen, &emb, &config)
            .maybe_auto_summarize(&mut g, &id)
            .unwrap();
        assert!(!summarized);
        assert!(g.block(&id).unwrap().summary.is_empty());
    }

    #[test]
    fn test_auto_summarize_propagate_policy() {
        let gen = FnGenerator::new(|_, _| Err(MindmapError::Generation("down".into())));
        let emb = KeyedEmbedder::new(vec![]);
        let config = EngineConfig {
            auto_summarize_after: 1,
            summary_failure: OnFailure::Propagate,
            ..EngineConfig::default()
        };
        let (mut g, id) = graph_with_messages(1);
        assert!(BlockLifecycle::new(&gen, &emb, &config)
            .maybe_auto_summarize(&mut g, &id)
            .is_err());
    }

    #[test]
    fn test_derive_title_bounds() {
        assert_eq!(
            derive_title("one two three four five six seven eight nine ten"),
            "One two three four five six seven eight"
        );
        let long = "a".repeat(100);
        assert_eq!(derive_title(&long).chars().count(), 60);
        assert_eq!(derive_title("   ?!  "), "Untitled");
        assert_eq!(derive_title("what is slow start?"), "What is slow start");
        let wordy = "internationalization localization globalization standardization";
        assert!(derive_title(wordy).chars().count() <= 60);
    }

    #[test]
    fn test_deepen_seed() {
        let seed = deepen_seed("TCP congestion", "tell me more about slow start.");
        assert_eq!(seed.title, "TCP congestion: Tell me more about slow start");
        assert!(seed.intent.starts_with("Go deeper into TCP congestion:"));

        let empty = deepen_seed("TCP congestion", "...");
        assert_eq!(empty.title, "TCP congestion in depth");

        let orphan = deepen_seed("  ", "tell me more about slow start.");
        assert_eq!(orphan.title, "Tell me more about slow start");
    }

    #[test]
    fn test_deepen_seed_title_is_capped() {
        let parent = "Congestion control in long fat networks and satellite links";
        let seed = deepen_seed(parent, "how does window scaling interact with selective acks here");
        assert!(seed.title.starts_with("Congestion control in long fat"));
        assert!(seed.title.ends_with("..."));
        assert!(seed.title.chars().count() <= MAX_TITLE_CHARS);
    }
}

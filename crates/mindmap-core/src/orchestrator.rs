//! Turn-level state machine over a [`Mindmap`].
//!
//! Every mutation works on a copy of the mindmap and only replaces the live
//! one after the store has accepted it, so a failed turn leaves both memory
//! and disk as they were. The write merges the touched graphs into whatever
//! the store holds at that moment, under the store's lock, so another handle
//! on the same storage keeps its graphs.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::block::{Block, BlockRelation};
use crate::classification::{BlockAction, BlockSeed};
use crate::classifier::IntentClassifier;
use crate::config::EngineConfig;
use crate::context::build_turn_context;
use crate::embedder::Embedder;
use crate::error::{MindmapError, MindmapResult};
use crate::generator::Generator;
use crate::graph::ConversationGraph;
use crate::lifecycle::{deepen_seed, BlockLifecycle};
use crate::message::Role;
use crate::mindmap::{GraphSummary, Mindmap};
use crate::prompts;
use crate::store::MindmapStore;
use crate::viz::{to_visual_graph, VisualGraph};

/// What one turn did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub response: String,
    /// Action actually applied. A cold start reports `continue`.
    pub action: BlockAction,
    pub confidence: f32,
    pub graph_id: String,
    pub block_id: String,
    /// Blocks created during the turn, in creation order.
    pub created_blocks: Vec<String>,
    /// Set when the turn started a new graph.
    pub new_graph: bool,
}

pub struct Orchestrator {
    generator: Box<dyn Generator>,
    embedder: Box<dyn Embedder>,
    store: Box<dyn MindmapStore>,
    config: EngineConfig,
    mindmap: Mindmap,
}

impl Orchestrator {
    /// Validate `config` and load the persisted mindmap.
    pub fn new(
        generator: Box<dyn Generator>,
        embedder: Box<dyn Embedder>,
        store: Box<dyn MindmapStore>,
        config: EngineConfig,
    ) -> MindmapResult<Self> {
        config.validate()?;
        let mindmap = store.load()?;
        debug!(graphs = mindmap.graphs.len(), "mindmap loaded");
        Ok(Self {
            generator,
            embedder,
            store,
            config,
            mindmap,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mindmap(&self) -> &Mindmap {
        &self.mindmap
    }

    fn lifecycle(&self) -> BlockLifecycle<'_> {
        BlockLifecycle::new(self.generator.as_ref(), self.embedder.as_ref(), &self.config)
    }

    // --- Turns ---

    /// Open a new graph rooted at `user_message` and answer it there.
    pub fn start_new_conversation(&mut self, user_message: &str) -> MindmapResult<TurnOutcome> {
        let mut working = self.mindmap.clone();
        let (graph_id, root_id) = self.fork_graph(&mut working, user_message)?;
        let response = self.respond(&mut working, &graph_id, &root_id, user_message)?;
        self.commit(working)?;

        Ok(TurnOutcome {
            response,
            action: BlockAction::Continue,
            confidence: 1.0,
            graph_id,
            block_id: root_id.clone(),
            created_blocks: vec![root_id],
            new_graph: true,
        })
    }

    /// Classify `user_message` against the current block, move or branch
    /// accordingly, and answer in the resulting block. Starts a new graph
    /// when there is nothing to continue.
    pub fn continue_conversation(&mut self, user_message: &str) -> MindmapResult<TurnOutcome> {
        let Some((graph_id, current)) = self.active_block() else {
            info!("no active conversation, starting a new one");
            return self.start_new_conversation(user_message);
        };

        let classification = {
            let graph = self
                .mindmap
                .graph(&graph_id)
                .ok_or_else(|| MindmapError::GraphNotFound(graph_id.clone()))?;
            let history = graph.get_block_messages(&current.id);
            let start = history.len().saturating_sub(self.config.context_window);
            IntentClassifier::new(self.generator.as_ref(), self.embedder.as_ref(), &self.config)
                .classify(&current, user_message, &history[start..])?
        };
        info!(
            action = %classification.action,
            confidence = classification.confidence,
            block = %current.id,
            "message classified"
        );

        let mut working = self.mindmap.clone();
        let mut created_blocks = Vec::new();
        let mut new_graph = false;

        let (target_graph, target_block) = match classification.action {
            BlockAction::Continue => (graph_id, current.id.clone()),
            BlockAction::Deepen => {
                let seeds = if classification.seeds.is_empty() {
                    vec![deepen_seed(&current.title, user_message)]
                } else {
                    classification.seeds.clone()
                };
                created_blocks =
                    self.branch(&mut working, &graph_id, &current.id, &seeds, BlockRelation::Deepen)?;
                (graph_id, created_blocks[0].clone())
            }
            BlockAction::NewChild => {
                let seeds = if classification.seeds.is_empty() {
                    vec![BlockSeed::placeholder()]
                } else {
                    classification.seeds.clone()
                };
                created_blocks =
                    self.branch(&mut working, &graph_id, &current.id, &seeds, BlockRelation::Child)?;
                (graph_id, created_blocks[0].clone())
            }
            BlockAction::Tangent => {
                let (new_id, root_id) = self.fork_graph(&mut working, user_message)?;
                if let Some(graph) = working.graph_mut(&new_id) {
                    graph.metadata.insert("forked_from".into(), Value::from(graph_id.clone()));
                    graph
                        .metadata
                        .insert("forked_from_block".into(), Value::from(current.id.clone()));
                }
                info!(from = %graph_id, to = %new_id, "tangent, forked new graph");
                created_blocks.push(root_id.clone());
                new_graph = true;
                (new_id, root_id)
            }
        };

        let response = self.respond(&mut working, &target_graph, &target_block, user_message)?;
        self.commit(working)?;

        Ok(TurnOutcome {
            response,
            action: classification.action,
            confidence: classification.confidence,
            graph_id: target_graph,
            block_id: target_block,
            created_blocks,
            new_graph,
        })
    }

    /// Current graph id and a copy of the block a turn should start from. A
    /// missing current pointer falls back to the root.
    fn active_block(&self) -> Option<(String, Block)> {
        let graph = self.mindmap.current_graph()?;
        let block = graph.current_block().or_else(|| graph.root())?;
        Some((graph.id.clone(), block.clone()))
    }

    /// Create a graph with a root extracted from `seed_message` and make it
    /// current in `working`.
    fn fork_graph(&self, working: &mut Mindmap, seed_message: &str) -> MindmapResult<(String, String)> {
        let root = self.lifecycle().create_root(seed_message)?;
        let root_id = root.id.clone();

        let mut graph = ConversationGraph::new();
        graph.add_block(root)?;
        graph.set_current_block(&root_id)?;
        let graph_id = graph.id.clone();
        working.add_graph(graph);
        info!(graph = %graph_id, root = %root_id, "new conversation graph");
        Ok((graph_id, root_id))
    }

    /// Create one child of `parent_id` per seed and point the graph at the
    /// first one.
    fn branch(
        &self,
        working: &mut Mindmap,
        graph_id: &str,
        parent_id: &str,
        seeds: &[BlockSeed],
        relation: BlockRelation,
    ) -> MindmapResult<Vec<String>> {
        let lifecycle = self.lifecycle();
        let graph = working
            .graph_mut(graph_id)
            .ok_or_else(|| MindmapError::GraphNotFound(graph_id.to_string()))?;

        let mut created = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let parent = graph
                .block_mut(parent_id)
                .ok_or_else(|| MindmapError::BlockNotFound(parent_id.to_string()))?;
            let mut child = lifecycle.create_child(parent, &seed.title, &seed.intent)?;
            child.relation = Some(relation);
            created.push(child.id.clone());
            graph.add_block(child)?;
        }
        if let Some(first) = created.first() {
            graph.set_current_block(first)?;
        }
        Ok(created)
    }

    /// Record the user message, generate the answer from block-scoped
    /// context, record it, and run the auto-summarize check.
    fn respond(
        &self,
        working: &mut Mindmap,
        graph_id: &str,
        block_id: &str,
        user_message: &str,
    ) -> MindmapResult<String> {
        let graph = working
            .graph_mut(graph_id)
            .ok_or_else(|| MindmapError::GraphNotFound(graph_id.to_string()))?;
        graph.record_message(block_id, Role::User, user_message)?;

        let prompt = {
            let block = graph
                .block(block_id)
                .ok_or_else(|| MindmapError::BlockNotFound(block_id.to_string()))?;
            let context = build_turn_context(graph, block, self.config.context_window);
            prompts::answer_in_block(&block.intent, &context, user_message)
        };
        let response = self.generator.generate(&prompt, false)?;
        graph.record_message(block_id, Role::Assistant, &response)?;

        if self.lifecycle().maybe_auto_summarize(graph, block_id)? {
            debug!(block = %block_id, "auto-summarized");
        }
        Ok(response)
    }

    /// Merge the graphs `working` added, changed or dropped relative to the
    /// live mindmap into the stored one, then adopt what was written.
    fn commit(&mut self, working: Mindmap) -> MindmapResult<()> {
        let base = &self.mindmap;
        let changed: Vec<&ConversationGraph> = working
            .graphs
            .values()
            .filter(|g| base.graph(&g.id) != Some(*g))
            .collect();
        let dropped: Vec<&String> = base
            .graphs
            .keys()
            .filter(|id| !working.graphs.contains_key(*id))
            .collect();
        let current = working.current_graph_id.as_deref();

        let merged = self.store.update(&mut |stored: &mut Mindmap| {
            for graph in &changed {
                stored.graphs.insert(graph.id.clone(), (*graph).clone());
            }
            for id in &dropped {
                stored.graphs.remove(*id);
            }
            if let Some(id) = current.filter(|id| stored.graphs.contains_key(*id)) {
                stored.current_graph_id = Some(id.to_string());
            }
            Ok(())
        })?;
        debug!(
            changed = changed.len(),
            dropped = dropped.len(),
            graphs = merged.graphs.len(),
            "mindmap committed"
        );
        self.mindmap = merged;
        Ok(())
    }

    // --- Navigation ---

    /// Point the current graph at `block_id`. `None` if there is no such
    /// block in the current graph.
    pub fn switch_block(&mut self, block_id: &str) -> MindmapResult<Option<Block>> {
        let mut working = self.mindmap.clone();
        let Some(graph) = working.current_graph_mut() else {
            return Ok(None);
        };
        if graph.set_current_block(block_id).is_err() {
            return Ok(None);
        }
        let block = graph.block(block_id).cloned();
        self.commit(working)?;
        Ok(block)
    }

    /// Make `graph_id` the current graph. `None` if it does not exist.
    pub fn switch_graph(&mut self, graph_id: &str) -> MindmapResult<Option<GraphSummary>> {
        let mut working = self.mindmap.clone();
        if working.set_current_graph(graph_id).is_err() {
            return Ok(None);
        }
        self.commit(working)?;
        Ok(self
            .mindmap
            .summaries()
            .into_iter()
            .find(|s| s.graph_id == graph_id))
    }

    pub fn list_graphs(&self) -> Vec<GraphSummary> {
        self.mindmap.summaries()
    }

    /// Blocks of the current graph in tree order.
    pub fn list_blocks(&self) -> Vec<&Block> {
        self.mindmap
            .current_graph()
            .map(ConversationGraph::blocks_in_order)
            .unwrap_or_default()
    }

    pub fn current_graph(&self) -> Option<&ConversationGraph> {
        self.mindmap.current_graph()
    }

    pub fn current_block(&self) -> Option<&Block> {
        self.mindmap.current_graph()?.current_block()
    }

    // --- Editing ---

    /// Delete a non-root block of the current graph with all its descendants
    /// and their messages. Returns the number of blocks removed.
    pub fn delete_block(&mut self, block_id: &str) -> MindmapResult<usize> {
        let mut working = self.mindmap.clone();
        let graph = working
            .current_graph_mut()
            .ok_or(MindmapError::NoActiveGraph)?;
        let block = graph
            .block(block_id)
            .ok_or_else(|| MindmapError::BlockNotFound(block_id.to_string()))?;
        if block.is_root() || graph.root_block_id.as_deref() == Some(block_id) {
            return Err(MindmapError::CannotDeleteRoot(block_id.to_string()));
        }

        let parent_id = block.parent_id.clone();
        let mut doomed = graph.collect_descendants(block_id);
        doomed.insert(block_id.to_string());

        if let Some(parent) = parent_id.as_deref().and_then(|p| graph.block_mut(p)) {
            parent.children.retain(|c| !doomed.contains(c));
        }
        let current_deleted = graph
            .current_block_id
            .as_deref()
            .is_some_and(|c| doomed.contains(c));
        if current_deleted {
            graph.current_block_id = parent_id
                .filter(|p| graph.blocks.contains_key(p))
                .or_else(|| graph.root_block_id.clone());
        }

        let removed = graph.delete_blocks(&doomed);
        info!(block = %block_id, removed, "deleted block subtree");
        self.commit(working)?;
        Ok(removed)
    }

    /// Drop every graph and wipe the store.
    pub fn clear(&mut self) -> MindmapResult<()> {
        self.store.clear()?;
        self.mindmap = Mindmap::new();
        info!("mindmap cleared");
        Ok(())
    }

    // --- Export ---

    /// The current graph as plain JSON.
    pub fn export_graph(&self) -> MindmapResult<Option<Value>> {
        self.mindmap
            .current_graph()
            .map(|g| serde_json::to_value(g).map_err(MindmapError::from))
            .transpose()
    }

    /// Node/link view of the current graph.
    pub fn visualize(&self) -> Option<VisualGraph> {
        self.mindmap.current_graph().map(to_visual_graph)
    }
}

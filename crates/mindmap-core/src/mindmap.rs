//! A collection of independent conversation graphs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::{MindmapError, MindmapResult};
use crate::graph::ConversationGraph;
use crate::serde_compat::empty_as_none;

fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mindmap {
    #[serde(rename = "mindmap_id", default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub graphs: BTreeMap<String, ConversationGraph>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub current_graph_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Listing row for one graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub graph_id: String,
    pub title: String,
    pub block_count: usize,
    pub message_count: usize,
    pub is_current: bool,
}

impl Default for Mindmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Mindmap {
    pub fn new() -> Self {
        Self {
            id: new_id(),
            graphs: BTreeMap::new(),
            current_graph_id: None,
            metadata: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Insert a graph and make it current.
    pub fn add_graph(&mut self, graph: ConversationGraph) {
        let id = graph.id.clone();
        self.graphs.insert(id.clone(), graph);
        self.current_graph_id = Some(id);
    }

    pub fn graph(&self, id: &str) -> Option<&ConversationGraph> {
        self.graphs.get(id)
    }

    pub fn graph_mut(&mut self, id: &str) -> Option<&mut ConversationGraph> {
        self.graphs.get_mut(id)
    }

    pub fn current_graph(&self) -> Option<&ConversationGraph> {
        self.current_graph_id
            .as_deref()
            .and_then(|id| self.graphs.get(id))
    }

    pub fn current_graph_mut(&mut self) -> Option<&mut ConversationGraph> {
        let id = self.current_graph_id.as_deref()?;
        self.graphs.get_mut(id)
    }

    pub fn set_current_graph(&mut self, id: &str) -> MindmapResult<()> {
        if !self.graphs.contains_key(id) {
            return Err(MindmapError::GraphNotFound(id.to_string()));
        }
        self.current_graph_id = Some(id.to_string());
        Ok(())
    }

    pub fn summaries(&self) -> Vec<GraphSummary> {
        self.graphs
            .values()
            .map(|g| GraphSummary {
                graph_id: g.id.clone(),
                title: g.title(),
                block_count: g.blocks.len(),
                message_count: g.messages.len(),
                is_current: self.current_graph_id.as_deref() == Some(g.id.as_str()),
            })
            .collect()
    }

    /// Repair pointers and derived lists after deserialization.
    pub fn normalize(&mut self) {
        for (key, graph) in self.graphs.iter_mut() {
            if graph.id != *key {
                graph.id = key.clone();
            }
            graph.normalize();
            if let Err(e) = graph.validate() {
                warn!(graph = %key, "graph loaded with inconsistencies: {e}");
            }
        }
        if let Some(current) = self.current_graph_id.as_deref() {
            if !self.graphs.contains_key(current) {
                warn!("dangling current graph {current}, unsetting");
                self.current_graph_id = None;
            }
        }
    }

    // --- Snapshots ---

    pub fn to_snapshot(&self) -> MindmapResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build a mindmap from snapshot JSON, accepting the older single-graph
    /// layout (no `graphs` key) and upgrading it into a one-graph mindmap.
    pub fn from_snapshot_value(value: Value) -> MindmapResult<Self> {
        let Value::Object(obj) = value else {
            return Err(MindmapError::Storage("snapshot is not a JSON object".into()));
        };

        let mut mindmap = if obj.contains_key("graphs") {
            serde_json::from_value::<Mindmap>(Value::Object(obj))?
        } else {
            let graph = serde_json::from_value::<ConversationGraph>(Value::Object(obj))?;
            let mut upgraded = Mindmap::new();
            if !graph.blocks.is_empty() {
                info!(graph = %graph.id, "upgrading single-graph snapshot");
                upgraded.add_graph(graph);
                upgraded
                    .metadata
                    .insert("upgraded_from".into(), Value::from("single_graph"));
            }
            upgraded
        };
        mindmap.normalize();
        Ok(mindmap)
    }

    pub fn from_snapshot(text: &str) -> MindmapResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_snapshot_value(value)
    }

    /// Like [`Mindmap::from_snapshot`], but a corrupted snapshot yields an
    /// empty mindmap instead of an error.
    pub fn from_snapshot_lossy(text: &str) -> Self {
        if text.trim().is_empty() {
            return Self::new();
        }
        match Self::from_snapshot(text) {
            Ok(m) => m,
            Err(e) => {
                error!("corrupted mindmap snapshot, starting empty: {e}");
                Self::new()
            }
        }
    }
}

//! Node/link export of a conversation graph for force-directed renderers.

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockRelation};
use crate::graph::ConversationGraph;

const LINK_CONFIDENCE: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualGraph {
    pub graph_id: String,
    pub root_block_id: Option<String>,
    pub current_block_id: Option<String>,
    pub nodes: Vec<VisualNode>,
    pub links: Vec<VisualLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualNode {
    pub id: String,
    pub label: String,
    pub intent: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub open_questions: Vec<String>,
    pub message_count: usize,
    pub is_root: bool,
    pub is_current: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualLink {
    pub source: String,
    pub target: String,
    pub relation: BlockRelation,
    pub color: String,
    #[serde(rename = "strokeWidth")]
    pub stroke_width: f32,
    pub confidence: f32,
}

impl BlockRelation {
    pub fn color(&self) -> &'static str {
        match self {
            Self::Continue => "#4CAF50",
            Self::Deepen => "#66BB6A",
            Self::Child => "#2196F3",
            Self::Sibling => "#FF9800",
            Self::Tangent => "#F44336",
        }
    }

    pub fn stroke_width(&self) -> f32 {
        match self {
            Self::Continue => 3.0,
            Self::Deepen => 2.5,
            Self::Child => 2.0,
            Self::Sibling => 1.5,
            Self::Tangent => 1.0,
        }
    }
}

/// One node per block (in tree order) and one link per parent/child edge.
/// Blocks without a recorded relation are drawn as plain children.
pub fn to_visual_graph(graph: &ConversationGraph) -> VisualGraph {
    let blocks = graph.blocks_in_order();
    let nodes = blocks.iter().map(|b| node(graph, b)).collect();
    let links = blocks
        .iter()
        .filter_map(|b| {
            let parent = b.parent_id.as_ref()?;
            if graph.block(parent).is_none() {
                return None;
            }
            let relation = b.relation.unwrap_or(BlockRelation::Child);
            Some(VisualLink {
                source: parent.clone(),
                target: b.id.clone(),
                relation,
                color: relation.color().to_string(),
                stroke_width: relation.stroke_width(),
                confidence: LINK_CONFIDENCE,
            })
        })
        .collect();
    VisualGraph {
        graph_id: graph.id.clone(),
        root_block_id: graph.root_block_id.clone(),
        current_block_id: graph.current_block_id.clone(),
        nodes,
        links,
    }
}

fn node(graph: &ConversationGraph, block: &Block) -> VisualNode {
    VisualNode {
        id: block.id.clone(),
        label: block.label(),
        intent: block.intent.clone(),
        summary: block.summary.clone(),
        key_points: block.key_points.clone(),
        open_questions: block.open_questions.clone(),
        message_count: block.conversation_refs.len(),
        is_root: block.is_root(),
        is_current: graph.current_block_id.as_deref() == Some(block.id.as_str()),
        created_at: block.created_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_and_links() {
        let mut g = ConversationGraph::new();
        let root = Block::new(None, "".into(), "root".into(), vec![]);
        let root_id = root.id.clone();
        g.add_block(root).unwrap();

        let mut deep = Block::new(Some(root_id.clone()), "Deep".into(), "d".into(), vec![]);
        deep.relation = Some(BlockRelation::Deepen);
        let deep_id = deep.id.clone();
        g.add_block(deep).unwrap();
        g.add_block(Block::new(Some(root_id.clone()), "Plain".into(), "p".into(), vec![]))
            .unwrap();
        g.rebuild_children();
        g.set_current_block(&deep_id).unwrap();

        let viz = to_visual_graph(&g);
        assert_eq!(viz.nodes.len(), 3);
        assert_eq!(viz.links.len(), 2);
        assert!(viz.nodes[0].label.starts_with("Block "));
        assert!(viz.nodes[0].is_root);

        let deep_link = viz.links.iter().find(|l| l.target == deep_id).unwrap();
        assert_eq!(deep_link.color, "#66BB6A");
        assert_eq!(deep_link.stroke_width, 2.5);
        let plain_link = viz.links.iter().find(|l| l.target != deep_id).unwrap();
        assert_eq!(plain_link.relation, BlockRelation::Child);
        assert_eq!(plain_link.source, root_id);

        assert!(viz.nodes.iter().any(|n| n.is_current && n.id == deep_id));
    }

    #[test]
    fn test_serialized_key_names() {
        let mut g = ConversationGraph::new();
        let root = Block::new(None, "Root".into(), "r".into(), vec![]);
        let root_id = root.id.clone();
        g.add_block(root).unwrap();
        g.add_block(Block::new(Some(root_id.clone()), "Kid".into(), "k".into(), vec![]))
            .unwrap();
        g.set_current_block(&root_id).unwrap();

        let json = serde_json::to_value(to_visual_graph(&g)).unwrap();
        assert_eq!(json["graph_id"], g.id.as_str());
        assert_eq!(json["root_block_id"], root_id.as_str());
        assert_eq!(json["current_block_id"], root_id.as_str());

        let link = json["links"][0].as_object().unwrap();
        let mut keys: Vec<&str> = link.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["color", "confidence", "relation", "source", "strokeWidth", "target"]
        );
        assert_eq!(link["relation"], "child");
        assert_eq!(link["color"], "#2196F3");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::serde_compat::{empty_as_none, timestamp};

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// One topical sub-conversation inside a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "block_id")]
    pub id: String,
    #[serde(
        rename = "parent_block_id",
        default,
        deserialize_with = "empty_as_none"
    )]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,

    #[serde(with = "timestamp", default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "embedding", default)]
    pub intent_embedding: Vec<f32>,

    #[serde(default)]
    pub children: Vec<String>,
    /// Message ids in insertion order, without duplicates.
    #[serde(default)]
    pub conversation_refs: Vec<String>,

    /// How this block branched off its parent. Absent for roots and for
    /// blocks loaded from snapshots that predate the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<BlockRelation>,
}

impl Block {
    pub fn new(
        parent_id: Option<String>,
        title: String,
        intent: String,
        intent_embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            parent_id,
            title,
            intent,
            summary: String::new(),
            key_points: Vec::new(),
            open_questions: Vec::new(),
            created_at: Utc::now(),
            intent_embedding,
            children: Vec::new(),
            conversation_refs: Vec::new(),
            relation: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn add_message_ref(&mut self, message_id: &str) {
        if !self.conversation_refs.iter().any(|m| m == message_id) {
            self.conversation_refs.push(message_id.to_string());
        }
    }

    pub fn add_child(&mut self, block_id: &str) {
        if !self.children.iter().any(|c| c == block_id) {
            self.children.push(block_id.to_string());
        }
    }

    /// Title for display; falls back to a short id prefix.
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            let short: String = self.id.chars().take(8).collect();
            format!("Block {short}")
        } else {
            self.title.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// BlockRelation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockRelation {
    Continue,
    Deepen,
    Child,
    Sibling,
    Tangent,
}

impl fmt::Display for BlockRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Deepen => write!(f, "deepen"),
            Self::Child => write!(f, "child"),
            Self::Sibling => write!(f, "sibling"),
            Self::Tangent => write!(f, "tangent"),
        }
    }
}

impl std::str::FromStr for BlockRelation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "deepen" => Ok(Self::Deepen),
            "child" | "new_child" => Ok(Self::Child),
            "sibling" => Ok(Self::Sibling),
            "tangent" => Ok(Self::Tangent),
            _ => Err(format!("invalid relation: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refs_and_children_are_deduplicated() {
        let mut block = Block::new(None, "t".into(), "i".into(), vec![]);
        block.add_message_ref("m1");
        block.add_message_ref("m2");
        block.add_message_ref("m1");
        block.add_child("c1");
        block.add_child("c1");
        assert_eq!(block.conversation_refs, vec!["m1", "m2"]);
        assert_eq!(block.children, vec!["c1"]);
    }

    #[test]
    fn test_label_falls_back_to_id_prefix() {
        let mut block = Block::new(None, String::new(), "i".into(), vec![]);
        block.id = "01HXYZABCDEF".into();
        assert_eq!(block.label(), "Block 01HXYZAB");
        block.title = "Congestion".into();
        assert_eq!(block.label(), "Congestion");
    }

    #[test]
    fn test_legacy_block_fields() {
        let json = r#"{
            "block_id": "b1",
            "parent_block_id": "",
            "title": "Root",
            "intent": "Learn",
            "created_at": 1700000000.5,
            "embedding": [0.1, 0.2]
        }"#;
        let block: Block = serde_json::from_str(json).unwrap();
        assert_eq!(block.id, "b1");
        assert!(block.parent_id.is_none());
        assert_eq!(block.intent_embedding, vec![0.1, 0.2]);
        assert_eq!(block.created_at.timestamp_millis(), 1_700_000_000_500);
        assert!(block.summary.is_empty());
    }

    #[test]
    fn test_relation_parse() {
        assert_eq!("NEW_CHILD".parse::<BlockRelation>(), Ok(BlockRelation::Child));
        assert_eq!("deepen".parse::<BlockRelation>(), Ok(BlockRelation::Deepen));
        assert!("sideways".parse::<BlockRelation>().is_err());
    }
}

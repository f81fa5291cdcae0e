//! Classifier output and the loosely-typed reply it is built from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const PLACEHOLDER_TITLE: &str = "Untitled";
pub const PLACEHOLDER_INTENT: &str = "New discussion";

// ---------------------------------------------------------------------------
// BlockAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockAction {
    Continue,
    Deepen,
    NewChild,
    Tangent,
}

impl fmt::Display for BlockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Deepen => write!(f, "deepen"),
            Self::NewChild => write!(f, "new_child"),
            Self::Tangent => write!(f, "tangent"),
        }
    }
}

impl std::str::FromStr for BlockAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "continue" => Ok(Self::Continue),
            "deepen" => Ok(Self::Deepen),
            "new_child" | "newchild" | "child" => Ok(Self::NewChild),
            "tangent" => Ok(Self::Tangent),
            _ => Err(format!("invalid action: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockSeed
// ---------------------------------------------------------------------------

/// Title and intent for a block that is about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSeed {
    pub title: String,
    pub intent: String,
}

impl BlockSeed {
    pub fn new(title: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            intent: intent.into(),
        }
    }

    pub fn placeholder() -> Self {
        Self::new(PLACEHOLDER_TITLE, PLACEHOLDER_INTENT)
    }

    /// Build a seed from possibly-missing fields. Both empty means no seed;
    /// one empty gets the placeholder.
    pub fn from_parts(title: Option<&str>, intent: Option<&str>) -> Option<Self> {
        let title = title.map(str::trim).filter(|s| !s.is_empty());
        let intent = intent.map(str::trim).filter(|s| !s.is_empty());
        if title.is_none() && intent.is_none() {
            return None;
        }
        Some(Self::new(
            title.unwrap_or(PLACEHOLDER_TITLE),
            intent.unwrap_or(PLACEHOLDER_INTENT),
        ))
    }
}

// ---------------------------------------------------------------------------
// BlockClassification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockClassification {
    pub action: BlockAction,
    pub confidence: f32,
    pub rationale: String,
    pub seeds: Vec<BlockSeed>,
}

impl BlockClassification {
    pub fn new(action: BlockAction, confidence: f32, rationale: impl Into<String>) -> Self {
        Self {
            action,
            confidence: clamp_confidence(confidence),
            rationale: rationale.into(),
            seeds: Vec::new(),
        }
    }

    /// The result used when the external classifier cannot be reached or
    /// understood.
    pub fn fallback(reason: &str) -> Self {
        Self::new(
            BlockAction::Continue,
            0.5,
            format!("Fallback classification: {reason}"),
        )
    }
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.5
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// ClassificationReply
// ---------------------------------------------------------------------------

/// The external classifier's reply with every field optional. Nothing from
/// the raw object is trusted until [`ClassificationReply::into_classification`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationReply {
    pub classification: Option<String>,
    pub confidence: Option<f32>,
    pub reasoning: Option<String>,
    pub new_blocks: Vec<(Option<String>, Option<String>)>,
    pub new_block_title: Option<String>,
    pub new_block_intent: Option<String>,
}

impl ClassificationReply {
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

        let confidence = obj.get("confidence").and_then(|v| match v {
            Value::Number(n) => n.as_f64().map(|f| f as f32),
            Value::String(s) => s.trim().parse::<f32>().ok(),
            _ => None,
        });

        let new_blocks = obj
            .get("new_blocks")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|item| {
                        (
                            item.get("title").and_then(Value::as_str).map(str::to_string),
                            item.get("intent").and_then(Value::as_str).map(str::to_string),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            classification: text("classification").or_else(|| text("action")),
            confidence,
            reasoning: text("reasoning").or_else(|| text("rationale")),
            new_blocks,
            new_block_title: text("new_block_title"),
            new_block_intent: text("new_block_intent"),
        }
    }

    /// Validate into a typed classification. Unknown or missing actions map
    /// to `continue`; malformed seeds are dropped.
    pub fn into_classification(self) -> BlockClassification {
        let action = self
            .classification
            .as_deref()
            .and_then(|s| s.parse::<BlockAction>().ok())
            .unwrap_or(BlockAction::Continue);

        let mut seeds: Vec<BlockSeed> = self
            .new_blocks
            .iter()
            .filter_map(|(t, i)| BlockSeed::from_parts(t.as_deref(), i.as_deref()))
            .collect();
        if seeds.is_empty() {
            if let Some(seed) = BlockSeed::from_parts(
                self.new_block_title.as_deref(),
                self.new_block_intent.as_deref(),
            ) {
                seeds.push(seed);
            }
        }

        let mut classification = BlockClassification::new(
            action,
            self.confidence.unwrap_or(0.5),
            self.reasoning.unwrap_or_default(),
        );
        classification.seeds = seeds;
        classification
    }
}

//! Block-scoped prompt context.
//!
//! A turn prompt carries only what the block knows about itself plus a short
//! window of recent turns. Summarization gets the whole block history.

use crate::block::Block;
use crate::graph::ConversationGraph;
use crate::message::Message;

const NONE_YET: &str = "(none yet)";
const NO_MESSAGES: &str = "(No messages yet)";

/// Context for classification and answer generation: block header plus the
/// last `window_size` messages of the block.
pub fn build_turn_context(graph: &ConversationGraph, block: &Block, window_size: usize) -> String {
    let messages = graph.get_block_messages(&block.id);
    let start = messages.len().saturating_sub(window_size);
    let recent = &messages[start..];

    format!(
        "{header}\n\nCONVERSATION HISTORY (last {count} messages):\n{turns}\n",
        header = format_header(block),
        count = recent.len(),
        turns = format_turns(recent),
    )
}

/// Context for summarization: block header plus the entire block history.
pub fn build_summary_context(graph: &ConversationGraph, block: &Block) -> String {
    let messages = graph.get_block_messages(&block.id);
    format!(
        "{header}\n\nMESSAGES IN THIS BLOCK:\n{turns}\n",
        header = format_header(block),
        turns = format_turns(&messages),
    )
}

fn format_header(block: &Block) -> String {
    format!(
        "BLOCK CONTEXT:\nTitle: {}\nIntent: {}\nSummary: {}\n\nKEY POINTS COVERED:\n{}\n\nOPEN QUESTIONS:\n{}",
        block.title,
        block.intent,
        block.summary,
        format_bullets(&block.key_points),
        format_bullets(&block.open_questions),
    )
}

pub(crate) fn format_bullets(items: &[String]) -> String {
    if items.is_empty() {
        return NONE_YET.to_string();
    }
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_turns(messages: &[&Message]) -> String {
    if messages.is_empty() {
        return NO_MESSAGES.to_string();
    }
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.speaker(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

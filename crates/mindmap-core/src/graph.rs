//! The block tree of one conversation thread and the messages it owns.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::block::Block;
use crate::error::{MindmapError, MindmapResult};
use crate::message::{Message, Role};
use crate::serde_compat::empty_as_none;

fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationGraph {
    #[serde(rename = "graph_id", default = "new_id")]
    pub id: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub root_block_id: Option<String>,
    #[serde(default)]
    pub blocks: BTreeMap<String, Block>,
    #[serde(default)]
    pub messages: BTreeMap<String, Message>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub current_block_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Default for ConversationGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationGraph {
    pub fn new() -> Self {
        Self {
            id: new_id(),
            root_block_id: None,
            blocks: BTreeMap::new(),
            messages: BTreeMap::new(),
            current_block_id: None,
            metadata: Map::new(),
        }
    }

    // --- Lookup ---

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn block_mut(&mut self, id: &str) -> Option<&mut Block> {
        self.blocks.get_mut(id)
    }

    pub fn root(&self) -> Option<&Block> {
        self.root_block_id.as_deref().and_then(|id| self.blocks.get(id))
    }

    pub fn current_block(&self) -> Option<&Block> {
        self.current_block_id
            .as_deref()
            .and_then(|id| self.blocks.get(id))
    }

    /// Display title of the whole thread (the root's title).
    pub fn title(&self) -> String {
        self.root()
            .map(|b| b.label())
            .unwrap_or_else(|| "Untitled".to_string())
    }

    // --- Mutation ---

    /// Insert a block, enforcing the single-root and parent-exists rules.
    pub fn add_block(&mut self, block: Block) -> MindmapResult<()> {
        match block.parent_id.as_deref() {
            Some(parent_id) => {
                let parent =
                    self.blocks
                        .get_mut(parent_id)
                        .ok_or_else(|| MindmapError::ParentNotFound {
                            parent: parent_id.to_string(),
                            block: block.id.clone(),
                        })?;
                parent.add_child(&block.id);
            }
            None => match self.root_block_id.as_deref() {
                Some(root) if root != block.id => {
                    return Err(MindmapError::RootAlreadySet {
                        root: root.to_string(),
                        block: block.id.clone(),
                    });
                }
                Some(_) => {}
                None => self.root_block_id = Some(block.id.clone()),
            },
        }
        self.blocks.insert(block.id.clone(), block);
        Ok(())
    }

    /// Insert a message by id. A colliding id overwrites.
    pub fn add_message(&mut self, message: Message) {
        self.messages.insert(message.id.clone(), message);
    }

    /// Create a message owned by `block_id` and append it to the block's refs.
    pub fn record_message(
        &mut self,
        block_id: &str,
        role: Role,
        content: &str,
    ) -> MindmapResult<String> {
        let block = self
            .blocks
            .get_mut(block_id)
            .ok_or_else(|| MindmapError::BlockNotFound(block_id.to_string()))?;
        let message = Message::new(block_id.to_string(), role, content.to_string());
        let id = message.id.clone();
        block.add_message_ref(&id);
        self.add_message(message);
        Ok(id)
    }

    pub fn set_current_block(&mut self, block_id: &str) -> MindmapResult<()> {
        if !self.blocks.contains_key(block_id) {
            return Err(MindmapError::BlockNotFound(block_id.to_string()));
        }
        self.current_block_id = Some(block_id.to_string());
        Ok(())
    }

    /// Messages of a block in insertion order. Refs that do not resolve are
    /// skipped.
    pub fn get_block_messages(&self, block_id: &str) -> Vec<&Message> {
        let Some(block) = self.blocks.get(block_id) else {
            return Vec::new();
        };
        block
            .conversation_refs
            .iter()
            .filter_map(|id| self.messages.get(id))
            .collect()
    }

    /// Every block reachable through `children` from `block_id`, excluding
    /// the block itself.
    pub fn collect_descendants(&self, block_id: &str) -> BTreeSet<String> {
        let mut collected = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .blocks
            .get(block_id)
            .map(|b| b.children.iter().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(id) = stack.pop() {
            if id == block_id || !collected.insert(id.to_string()) {
                continue;
            }
            if let Some(block) = self.blocks.get(id) {
                stack.extend(block.children.iter().map(String::as_str));
            }
        }
        collected
    }

    /// Remove blocks and the messages they reference.
    ///
    /// Parent child-lists and the current pointer are left alone; callers fix
    /// those up before calling this.
    pub fn delete_blocks<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut removed = 0;
        for id in ids {
            let Some(block) = self.blocks.remove(id) else {
                continue;
            };
            for message_id in &block.conversation_refs {
                self.messages.remove(message_id);
            }
            removed += 1;
        }
        removed
    }

    /// Recompute every children list from parent pointers. Entries that are
    /// still valid keep their position; missing children are appended in id
    /// order.
    pub fn rebuild_children(&mut self) {
        let parent_of: HashMap<String, String> = self
            .blocks
            .values()
            .filter_map(|b| b.parent_id.clone().map(|p| (b.id.clone(), p)))
            .collect();

        for block in self.blocks.values_mut() {
            let id = block.id.clone();
            block
                .children
                .retain(|c| parent_of.get(c).is_some_and(|p| *p == id));
        }

        let mut links: Vec<(&String, &String)> =
            parent_of.iter().map(|(child, parent)| (parent, child)).collect();
        links.sort();
        for (parent_id, child_id) in links {
            if let Some(parent) = self.blocks.get_mut(parent_id) {
                parent.add_child(child_id);
            }
        }
    }

    /// Repair a freshly deserialized graph: children lists, root and current
    /// pointers.
    pub fn normalize(&mut self) {
        self.rebuild_children();

        let root_ok = self
            .root_block_id
            .as_deref()
            .is_some_and(|id| self.blocks.get(id).is_some_and(Block::is_root));
        if !root_ok {
            self.root_block_id = self
                .blocks
                .values()
                .find(|b| b.is_root())
                .map(|b| b.id.clone());
        }

        if let Some(current) = self.current_block_id.as_deref() {
            if !self.blocks.contains_key(current) {
                debug!(graph = %self.id, "dangling current block {current}, resetting to root");
                self.current_block_id = self.root_block_id.clone();
            }
        }
    }

    /// Check structural invariants. Returns the first violation found.
    pub fn validate(&self) -> MindmapResult<()> {
        let roots: Vec<&Block> = self.blocks.values().filter(|b| b.is_root()).collect();
        if roots.len() > 1 {
            return Err(MindmapError::RootAlreadySet {
                root: roots[0].id.clone(),
                block: roots[1].id.clone(),
            });
        }
        if !self.blocks.is_empty() {
            let root = self
                .root_block_id
                .as_deref()
                .ok_or_else(|| MindmapError::BlockNotFound("<root>".into()))?;
            if !self.blocks.contains_key(root) {
                return Err(MindmapError::BlockNotFound(root.to_string()));
            }
        }
        if let Some(current) = self.current_block_id.as_deref() {
            if !self.blocks.contains_key(current) {
                return Err(MindmapError::BlockNotFound(current.to_string()));
            }
        }
        for block in self.blocks.values() {
            if let Some(parent_id) = block.parent_id.as_deref() {
                let parent =
                    self.blocks
                        .get(parent_id)
                        .ok_or_else(|| MindmapError::ParentNotFound {
                            parent: parent_id.to_string(),
                            block: block.id.clone(),
                        })?;
                if !parent.children.contains(&block.id) {
                    return Err(MindmapError::ParentNotFound {
                        parent: parent_id.to_string(),
                        block: block.id.clone(),
                    });
                }
            }
            for child_id in &block.children {
                let child = self
                    .blocks
                    .get(child_id)
                    .ok_or_else(|| MindmapError::BlockNotFound(child_id.clone()))?;
                if child.parent_id.as_deref() != Some(block.id.as_str()) {
                    return Err(MindmapError::ParentNotFound {
                        parent: block.id.clone(),
                        block: child_id.clone(),
                    });
                }
            }
            for message_id in &block.conversation_refs {
                if !self.messages.contains_key(message_id) {
                    return Err(MindmapError::Storage(format!(
                        "block '{}' references missing message '{message_id}'",
                        block.id
                    )));
                }
            }
        }
        Ok(())
    }

    // --- Views ---

    /// Blocks in depth-first pre-order from the root, children in list order.
    pub fn blocks_in_order(&self) -> Vec<&Block> {
        self.walk()
            .into_iter()
            .map(|(block, _)| block)
            .collect()
    }

    /// Indented text tree, one block per line group.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        for (block, depth) in self.walk() {
            let indent = "  ".repeat(depth);
            let marker = if self.current_block_id.as_deref() == Some(block.id.as_str()) {
                " *"
            } else {
                ""
            };
            let _ = writeln!(out, "{indent}[{}] {}{marker}", block.id, block.label());
            let _ = writeln!(out, "{indent}   Intent: {}", block.intent);
            let _ = writeln!(
                out,
                "{indent}   Messages: {}",
                block.conversation_refs.len()
            );
        }
        out
    }

    fn walk(&self) -> Vec<(&Block, usize)> {
        let mut ordered = Vec::new();
        let Some(root) = self.root() else {
            return ordered;
        };
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&Block, usize)> = vec![(root, 0)];

        while let Some((block, depth)) = stack.pop() {
            if !seen.insert(block.id.as_str()) {
                continue;
            }
            ordered.push((block, depth));
            for child_id in block.children.iter().rev() {
                if let Some(child) = self.blocks.get(child_id) {
                    stack.push((child, depth + 1));
                }
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Block {
        Block::new(None, "Root".into(), "root intent".into(), vec![1.0, 0.0])
    }

    fn child_of(parent: &Block, title: &str) -> Block {
        Block::new(
            Some(parent.id.clone()),
            title.into(),
            format!("{title} intent"),
            vec![0.0, 1.0],
        )
    }

    /// root -> a -> (a1, a2), root -> b
    fn sample() -> (ConversationGraph, [String; 5]) {
        let mut g = ConversationGraph::new();
        let r = root();
        let a = child_of(&r, "a");
        let b = child_of(&r, "b");
        let a1 = child_of(&a, "a1");
        let a2 = child_of(&a, "a2");
        let ids = [
            r.id.clone(),
            a.id.clone(),
            b.id.clone(),
            a1.id.clone(),
            a2.id.clone(),
        ];
        for block in [r, a, b, a1, a2] {
            g.add_block(block).unwrap();
        }
        (g, ids)
    }

    #[test]
    fn test_first_rootless_block_becomes_root() {
        let mut g = ConversationGraph::new();
        let r = root();
        let id = r.id.clone();
        g.add_block(r).unwrap();
        assert_eq!(g.root_block_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_second_root_rejected() {
        let mut g = ConversationGraph::new();
        g.add_block(root()).unwrap();
        let err = g.add_block(root()).unwrap_err();
        assert!(matches!(err, MindmapError::RootAlreadySet { .. }));
        assert_eq!(g.blocks.len(), 1);
    }

    #[test]
    fn test_re_adding_root_is_allowed() {
        let mut g = ConversationGraph::new();
        let r = root();
        g.add_block(r.clone()).unwrap();
        g.add_block(r).unwrap();
        assert_eq!(g.blocks.len(), 1);
    }

    #[test]
    fn test_missing_parent_rejected() {
        let mut g = ConversationGraph::new();
        let orphan = Block::new(Some("ghost".into()), "x".into(), "y".into(), vec![]);
        let err = g.add_block(orphan).unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert!(g.blocks.is_empty());
    }

    #[test]
    fn test_add_block_registers_child_once() {
        let (g, [r, a, b, ..]) = sample();
        assert_eq!(g.blocks[&r].children, vec![a, b]);
        g.validate().unwrap();
    }

    #[test]
    fn test_invariants_hold_after_each_insert() {
        let mut g = ConversationGraph::new();
        let r = root();
        let mut parents = vec![r.clone()];
        g.add_block(r).unwrap();
        for i in 0..12 {
            let parent = parents[i % parents.len()].clone();
            let child = child_of(&parent, &format!("n{i}"));
            g.add_block(child.clone()).unwrap();
            parents.push(child);
            g.validate().unwrap();
        }
        assert_eq!(g.blocks.values().filter(|b| b.is_root()).count(), 1);
    }

    #[test]
    fn test_record_and_get_messages_in_order() {
        let (mut g, [r, ..]) = sample();
        let m1 = g.record_message(&r, Role::User, "hello").unwrap();
        let m2 = g.record_message(&r, Role::Assistant, "hi").unwrap();
        let msgs = g.get_block_messages(&r);
        assert_eq!(
            msgs.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec![m1.as_str(), m2.as_str()]
        );
        assert_eq!(msgs[1].role, Role::Assistant);
    }

    #[test]
    fn test_get_messages_skips_dangling_refs() {
        let (mut g, [r, ..]) = sample();
        g.record_message(&r, Role::User, "kept").unwrap();
        g.blocks.get_mut(&r).unwrap().add_message_ref("gone");
        let msgs = g.get_block_messages(&r);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "kept");
        assert!(g.get_block_messages("nope").is_empty());
    }

    #[test]
    fn test_record_message_unknown_block() {
        let mut g = ConversationGraph::new();
        assert!(matches!(
            g.record_message("nope", Role::User, "x"),
            Err(MindmapError::BlockNotFound(_))
        ));
    }

    #[test]
    fn test_collect_descendants() {
        let (g, [r, a, b, a1, a2]) = sample();
        let all = g.collect_descendants(&r);
        assert_eq!(all.len(), 4);
        for id in [&a, &b, &a1, &a2] {
            assert!(all.contains(id));
        }
        let under_a = g.collect_descendants(&a);
        assert_eq!(under_a, BTreeSet::from([a1, a2]));
        assert!(g.collect_descendants(&b).is_empty());
    }

    #[test]
    fn test_collect_descendants_survives_cycle() {
        let (mut g, [r, a, _, a1, _]) = sample();
        // a1 -> root closes a loop that must not hang the traversal
        g.blocks.get_mut(&a1).unwrap().children.push(r.clone());
        let found = g.collect_descendants(&a);
        assert!(found.contains(&a1));
        assert!(found.contains(&r));
        let from_root = g.collect_descendants(&r);
        assert!(!from_root.contains(&r));
    }

    #[test]
    fn test_delete_blocks_cascades_messages() {
        let (mut g, [r, a, _, a1, _]) = sample();
        g.record_message(&a, Role::User, "q").unwrap();
        g.record_message(&a1, Role::User, "q2").unwrap();
        let keep = g.record_message(&r, Role::User, "root msg").unwrap();
        let removed = g.delete_blocks(&[a.clone(), a1.clone()]);
        assert_eq!(removed, 2);
        assert_eq!(g.messages.len(), 1);
        assert!(g.messages.contains_key(&keep));
        // parent list untouched by the primitive
        assert!(g.blocks[&r].children.contains(&a));
    }

    #[test]
    fn test_rebuild_children_from_parent_pointers() {
        let (mut g, [r, a, b, a1, a2]) = sample();
        for block in g.blocks.values_mut() {
            block.children = vec!["stale".into()];
        }
        g.rebuild_children();
        assert_eq!(g.blocks[&r].children.len(), 2);
        assert!(g.blocks[&r].children.contains(&a));
        assert!(g.blocks[&r].children.contains(&b));
        assert_eq!(g.blocks[&a].children.len(), 2);
        assert!(g.blocks[&a].children.contains(&a1));
        assert!(g.blocks[&a].children.contains(&a2));
        g.validate().unwrap();
    }

    #[test]
    fn test_rebuild_children_keeps_existing_order() {
        let (mut g, [r, a, b, ..]) = sample();
        g.blocks.get_mut(&r).unwrap().children = vec![b.clone(), a.clone()];
        g.rebuild_children();
        assert_eq!(g.blocks[&r].children, vec![b, a]);
    }

    #[test]
    fn test_normalize_resets_dangling_current() {
        let (mut g, [r, ..]) = sample();
        g.current_block_id = Some("missing".into());
        g.normalize();
        assert_eq!(g.current_block_id.as_deref(), Some(r.as_str()));
    }

    #[test]
    fn test_blocks_in_order_is_preorder() {
        let (g, [r, a, b, a1, a2]) = sample();
        let order: Vec<&str> = g.blocks_in_order().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(
            order,
            vec![r.as_str(), a.as_str(), a1.as_str(), a2.as_str(), b.as_str()]
        );
    }

    #[test]
    fn test_render_tree_marks_current() {
        let (mut g, [_, a, ..]) = sample();
        g.set_current_block(&a).unwrap();
        let tree = g.render_tree();
        assert!(tree.contains("Root"));
        assert!(tree.contains(&format!("[{a}] a *")));
        assert!(tree.contains("    [")); // grandchildren are indented twice
    }

    #[test]
    fn test_set_current_block_unknown() {
        let mut g = ConversationGraph::new();
        assert!(g.set_current_block("x").is_err());
        assert!(g.current_block_id.is_none());
    }
}

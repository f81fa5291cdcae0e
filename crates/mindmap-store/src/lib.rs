pub mod json_store;
pub mod schema;
pub mod store;

pub use json_store::JsonFileStore;
pub use store::SqliteStore;

#[cfg(test)]
pub(crate) mod test_fixtures {
    use mindmap_core::{Block, ConversationGraph, Mindmap, Role};

    /// One graph: a root with two children and three messages spread across
    /// them.
    pub fn sample_mindmap() -> Mindmap {
        let mut graph = ConversationGraph::new();
        let root = Block::new(None, "TCP".into(), "Learn TCP".into(), vec![1.0, 0.0]);
        let root_id = root.id.clone();
        graph.add_block(root).unwrap();

        let a = Block::new(
            Some(root_id.clone()),
            "Slow start".into(),
            "Explain slow start".into(),
            vec![0.75, 0.25],
        );
        let a_id = a.id.clone();
        graph.add_block(a).unwrap();
        let b = Block::new(
            Some(root_id.clone()),
            "RTO".into(),
            "Explain retransmission timeouts".into(),
            vec![0.5, 0.5],
        );
        let b_id = b.id.clone();
        graph.add_block(b).unwrap();

        graph.record_message(&root_id, Role::User, "Explain TCP").unwrap();
        graph.record_message(&a_id, Role::Assistant, "Slow start doubles cwnd").unwrap();
        graph.record_message(&b_id, Role::User, "And timeouts?").unwrap();
        graph.set_current_block(&a_id).unwrap();

        let mut mindmap = Mindmap::new();
        mindmap.add_graph(graph);
        mindmap
    }
}

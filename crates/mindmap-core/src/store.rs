use std::sync::{Arc, Mutex};

use crate::error::{MindmapError, MindmapResult};
use crate::mindmap::Mindmap;

/// Persistence for a whole mindmap snapshot.
///
/// `load` on a store with nothing saved returns an empty mindmap. A snapshot
/// that cannot be parsed also loads as empty; backends log it and move on.
///
/// `update` is the read-modify-write path: the backend holds its lock from
/// the read until the write, so two handles on the same storage cannot lose
/// each other's changes. It returns the mindmap as written.
pub trait MindmapStore: Send + Sync {
    fn load(&self) -> MindmapResult<Mindmap>;
    fn save(&self, mindmap: &Mindmap) -> MindmapResult<()>;
    fn clear(&self) -> MindmapResult<()>;
    fn update(&self, apply: &mut Updater<'_>) -> MindmapResult<Mindmap>;
}

/// Edit applied to the stored mindmap inside [`MindmapStore::update`].
/// An error aborts the write.
pub type Updater<'a> = dyn FnMut(&mut Mindmap) -> MindmapResult<()> + 'a;

impl<S: MindmapStore + ?Sized> MindmapStore for Arc<S> {
    fn load(&self) -> MindmapResult<Mindmap> {
        (**self).load()
    }

    fn save(&self, mindmap: &Mindmap) -> MindmapResult<()> {
        (**self).save(mindmap)
    }

    fn clear(&self) -> MindmapResult<()> {
        (**self).clear()
    }

    fn update(&self, apply: &mut Updater<'_>) -> MindmapResult<Mindmap> {
        (**self).update(apply)
    }
}

/// Keeps the serialized snapshot in memory, so a save/load cycle goes through
/// the same JSON as the file backends.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    snapshot: Mutex<Option<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw snapshot text.
    pub fn with_snapshot(text: impl Into<String>) -> Self {
        Self {
            snapshot: Mutex::new(Some(text.into())),
        }
    }

    pub fn snapshot(&self) -> Option<String> {
        self.snapshot.lock().ok().and_then(|s| s.clone())
    }

    fn slot(&self) -> MindmapResult<std::sync::MutexGuard<'_, Option<String>>> {
        self.snapshot
            .lock()
            .map_err(|_| MindmapError::Storage("in-memory store lock poisoned".into()))
    }
}

impl MindmapStore for InMemoryStore {
    fn load(&self) -> MindmapResult<Mindmap> {
        Ok(match self.slot()?.as_deref() {
            Some(text) => Mindmap::from_snapshot_lossy(text),
            None => Mindmap::new(),
        })
    }

    fn save(&self, mindmap: &Mindmap) -> MindmapResult<()> {
        let text = mindmap.to_snapshot()?;
        *self.slot()? = Some(text);
        Ok(())
    }

    fn clear(&self) -> MindmapResult<()> {
        *self.slot()? = None;
        Ok(())
    }

    fn update(&self, apply: &mut Updater<'_>) -> MindmapResult<Mindmap> {
        let mut slot = self.slot()?;
        let mut mindmap = match slot.as_deref() {
            Some(text) => Mindmap::from_snapshot_lossy(text),
            None => Mindmap::new(),
        };
        apply(&mut mindmap)?;
        *slot = Some(mindmap.to_snapshot()?);
        Ok(mindmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::graph::ConversationGraph;

    #[test]
    fn test_empty_store_loads_empty() {
        let store = InMemoryStore::new();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_clear() {
        let store = InMemoryStore::new();
        let mut m = Mindmap::new();
        let mut g = ConversationGraph::new();
        g.add_block(Block::new(None, "t".into(), "i".into(), vec![1.0])).unwrap();
        m.add_graph(g);

        store.save(&m).unwrap();
        assert_eq!(store.load().unwrap(), m);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_loads_empty() {
        let store = InMemoryStore::with_snapshot("{ not json");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_update_applies_to_stored_state() {
        let store = InMemoryStore::new();
        let first = ConversationGraph::new();
        let first_id = first.id.clone();
        let mut stale = store.load().unwrap();
        store.update(&mut |m: &mut Mindmap| {
            m.add_graph(first.clone());
            Ok(())
        })
        .unwrap();

        // An edit built from a stale load still sees the graph saved above.
        stale.add_graph(ConversationGraph::new());
        let written = store
            .update(&mut |m: &mut Mindmap| {
                for (id, g) in &stale.graphs {
                    m.graphs.insert(id.clone(), g.clone());
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(written.graphs.len(), 2);
        assert!(store.load().unwrap().graphs.contains_key(&first_id));
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let store = InMemoryStore::new();
        let err = store
            .update(&mut |m: &mut Mindmap| {
                m.add_graph(ConversationGraph::new());
                Err(MindmapError::Storage("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, MindmapError::Storage(_)));
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_arc_store_delegates() {
        let store = Arc::new(InMemoryStore::new());
        let shared: Arc<InMemoryStore> = Arc::clone(&store);
        shared.save(&Mindmap::new()).unwrap();
        assert!(store.snapshot().is_some());
    }
}

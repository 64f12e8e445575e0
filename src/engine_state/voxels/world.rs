//! # World Module
//!
//! The chunk cache. [`ChunkStore`] owns exactly one [`Chunk`] per resident
//! coordinate and reconciles itself against the working set computed by the
//! visibility calculator.
//!
//! Chunks are shared with the pipeline workers through `Arc`, but only the
//! store decides residency: an evicted chunk is disposed and dropped from the
//! map right away, even if a worker still holds a reference to it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::chunk::chunk_state::ChunkState;
use super::chunk::{Chunk, ChunkKey, MeshBuffers};

/// What a reconcile pass changed.
pub struct Reconciliation<Buf> {
    /// Chunks removed from the store, with any mesh buffers they held
    pub evicted: Vec<(ChunkKey, Option<MeshBuffers<Buf>>)>,
    /// Chunks added to the store, already `Queued`, in working-set order
    pub created: Vec<Arc<Chunk<Buf>>>,
}

impl<Buf> Reconciliation<Buf> {
    /// Whether the pass changed nothing.
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.created.is_empty()
    }
}

/// Resident chunks keyed by coordinate.
pub struct ChunkStore<Buf> {
    chunks: HashMap<ChunkKey, Arc<Chunk<Buf>>>,
}

impl<Buf> ChunkStore<Buf> {
    /// Creates an empty store.
    pub fn new() -> Self {
        ChunkStore {
            chunks: HashMap::new(),
        }
    }

    /// Makes the store hold exactly the chunks in `visible`.
    ///
    /// Chunks outside `visible` are disposed and removed. Keys in `visible`
    /// without a chunk get a fresh all-air chunk in the `Queued` state; the
    /// caller is expected to submit each of them for generation.
    pub fn reconcile(&mut self, visible: &[ChunkKey]) -> Reconciliation<Buf> {
        let wanted: HashSet<ChunkKey> = visible.iter().copied().collect();

        let stale: Vec<ChunkKey> = self
            .chunks
            .keys()
            .filter(|key| !wanted.contains(key))
            .copied()
            .collect();
        let evicted = stale
            .into_iter()
            .filter_map(|key| self.chunks.remove(&key))
            .map(|chunk| (chunk.key(), chunk.dispose()))
            .collect();

        let mut created = Vec::new();
        for &key in visible {
            if self.chunks.contains_key(&key) {
                continue;
            }
            let chunk = Arc::new(Chunk::new(key));
            // a fresh chunk is always Unloaded
            let _ = chunk.transition(ChunkState::Unloaded, ChunkState::Queued);
            self.chunks.insert(key, Arc::clone(&chunk));
            created.push(chunk);
        }

        Reconciliation { evicted, created }
    }

    /// Inserts a chunk, replacing and returning any chunk at the same key.
    pub fn insert(&mut self, chunk: Arc<Chunk<Buf>>) -> Option<Arc<Chunk<Buf>>> {
        self.chunks.insert(chunk.key(), chunk)
    }

    /// The resident chunk at `key`, if any.
    pub fn get(&self, key: ChunkKey) -> Option<&Arc<Chunk<Buf>>> {
        self.chunks.get(&key)
    }

    /// Whether `key` is resident.
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.chunks.contains_key(&key)
    }

    /// Number of resident chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk is resident.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Resident chunks in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Chunk<Buf>>> {
        self.chunks.values()
    }

    /// Disposes and removes every chunk.
    pub fn drain_all(&mut self) -> Vec<(ChunkKey, Option<MeshBuffers<Buf>>)> {
        self.chunks
            .drain()
            .map(|(key, chunk)| (key, chunk.dispose()))
            .collect()
    }
}

impl<Buf> Default for ChunkStore<Buf> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::visibility::working_set;

    #[test]
    fn reconcile_creates_the_working_set_once() {
        let mut store = ChunkStore::<Vec<u8>>::new();
        let visible = working_set(ChunkKey::ORIGIN, 2);

        let first = store.reconcile(&visible);
        assert_eq!(first.created.len(), 25);
        assert!(first.evicted.is_empty());
        assert!(first
            .created
            .iter()
            .all(|chunk| chunk.state() == ChunkState::Queued));
        let created: Vec<_> = first.created.iter().map(|c| c.key()).collect();
        assert_eq!(created, visible);

        assert!(store.reconcile(&visible).is_empty());
        assert_eq!(store.len(), 25);
    }

    #[test]
    fn moving_evicts_and_creates_the_difference() {
        let mut store = ChunkStore::<Vec<u8>>::new();
        store.reconcile(&working_set(ChunkKey::ORIGIN, 1));

        let change = store.reconcile(&working_set(ChunkKey::new(1, 0), 1));

        let mut evicted: Vec<_> = change.evicted.iter().map(|(k, _)| *k).collect();
        evicted.sort();
        assert_eq!(
            evicted,
            vec![ChunkKey::new(-1, -1), ChunkKey::new(-1, 0), ChunkKey::new(-1, 1)]
        );
        assert_eq!(change.created.len(), 3);
        assert!(change.created.iter().all(|c| c.key().x == 2));
        assert_eq!(store.len(), 9);
        assert!(!store.contains(ChunkKey::new(-1, 0)));
    }

    #[test]
    fn evicted_chunks_are_disposed_even_if_shared() {
        let mut store = ChunkStore::<Vec<u8>>::new();
        let created = store.reconcile(&[ChunkKey::ORIGIN]).created;
        let in_flight = Arc::clone(&created[0]);

        let change = store.reconcile(&[]);

        assert_eq!(change.evicted.len(), 1);
        assert!(in_flight.is_discarded());
        assert_eq!(in_flight.state(), ChunkState::Disposed);
        assert!(store.is_empty());
    }

    #[test]
    fn drain_all_hands_back_published_meshes() {
        let mut store = ChunkStore::<Vec<u8>>::new();
        let chunk = store.reconcile(&[ChunkKey::ORIGIN]).created.remove(0);
        chunk.transition(ChunkState::Queued, ChunkState::Generating).unwrap();
        chunk.transition(ChunkState::Generating, ChunkState::Meshing).unwrap();
        let published = chunk.publish_mesh(MeshBuffers {
            vertex: vec![1],
            index: vec![2],
            face_count: 1,
        });
        assert!(matches!(published, Ok(None)));

        let drained = store.drain_all();

        assert_eq!(drained.len(), 1);
        let buffers = drained[0].1.as_ref().unwrap();
        assert_eq!(buffers.vertex, vec![1]);
        assert!(store.is_empty());
    }
}

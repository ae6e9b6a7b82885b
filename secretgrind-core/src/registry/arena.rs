//! Index-based ownership for [`Chunk`]s: a child references its master by
//! [`ChunkId`] rather than by pointer, so the "freed-but-child-referenced
//! master survives" retention rule (spec.md §3, Chunk invariants) is just a
//! reference count on a plain `Vec` slot.

use super::chunk::{Chunk, ChunkId};

#[derive(Default)]
pub struct ChunkArena {
    slots: Vec<Option<Chunk>>,
}

impl ChunkArena {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn insert(&mut self, chunk: Chunk) -> ChunkId {
        let id = self.slots.len();
        self.slots.push(Some(chunk));
        id
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.slots.get(id).and_then(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.slots.get_mut(id).and_then(|c| c.as_mut())
    }

    /// Destroy the chunk's storage. Callers must only do this once the
    /// chunk's child count is zero and no provenance list still references it.
    pub fn destroy(&mut self, id: ChunkId) -> Option<Chunk> {
        self.slots.get_mut(id).and_then(|c| c.take())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, c)| c.as_ref().map(|c| (id, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::chunk::{AddrClass, AllocApi, ExecutionContext};

    #[test]
    fn insert_get_destroy_round_trip() {
        let mut arena = ChunkArena::new();
        let id = arena.insert(Chunk::new(
            0x1000,
            0x10,
            0,
            AddrClass::HeapMalloc,
            AllocApi::Malloc,
            ExecutionContext::default(),
        ));
        assert!(arena.get(id).is_some());
        let destroyed = arena.destroy(id);
        assert!(destroyed.is_some());
        assert!(arena.get(id).is_none());
    }
}

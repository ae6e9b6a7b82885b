//! Six singly-linked per-address-class lists of chunks, used by the summary
//! engine to explain a tainted range.

use std::collections::VecDeque;

use crate::error::InvariantViolation;

use super::arena::ChunkArena;
use super::chunk::{AddrClass, ChunkId};

#[derive(Default)]
pub struct ProvenanceRegistry {
    lists: [VecDeque<ChunkId>; 6],
    heap_min: u64,
    heap_max: u64,
}

fn class_slot(class: AddrClass) -> usize {
    AddrClass::ALL.iter().position(|&c| c == class).unwrap()
}

impl ProvenanceRegistry {
    pub fn new() -> Self {
        Self {
            lists: Default::default(),
            heap_min: u64::MAX,
            heap_max: 0,
        }
    }

    /// Head-insert: O(1).
    pub fn insert(&mut self, class: AddrClass, id: ChunkId, arena: &ChunkArena) {
        self.lists[class_slot(class)].push_front(id);
        if class == AddrClass::HeapMalloc {
            if let Some(chunk) = arena.get(id) {
                self.heap_min = self.heap_min.min(chunk.data);
                self.heap_max = self.heap_max.max(chunk.end());
            }
        }
    }

    /// O(n): removal is rare (only happens when a chunk is fully destroyed).
    pub fn remove(&mut self, class: AddrClass, id: ChunkId) {
        let list = &mut self.lists[class_slot(class)];
        if let Some(pos) = list.iter().position(|&x| x == id) {
            list.remove(pos);
        }
    }

    pub fn iter(&self, class: AddrClass) -> impl Iterator<Item = ChunkId> + '_ {
        self.lists[class_slot(class)].iter().copied()
    }

    /// First master chunk of `class` that strictly contains `[addr, addr+len)`.
    /// Returns `Err` (fatal assertion, per spec.md §4.5) if a chunk overlaps
    /// the range without fully containing it — the caller (ultimately
    /// `main`) turns this into a process abort rather than attempting to
    /// keep going.
    pub fn get_parent_block(
        &self,
        arena: &ChunkArena,
        class: AddrClass,
        addr: u64,
        len: u64,
    ) -> Result<Option<ChunkId>, InvariantViolation> {
        for id in self.iter(class) {
            let Some(chunk) = arena.get(id) else { continue };
            if !chunk.master {
                continue;
            }
            let overlaps = addr < chunk.end() && addr + len > chunk.data;
            if !overlaps {
                continue;
            }
            if !chunk.contains_range(addr, len) {
                return Err(InvariantViolation::StraddlingRange(addr, addr + len));
            }
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Every chunk of `class` whose range overlaps `[lo, hi)` at all, used
    /// by the summary engine to list every chunk touching an emitted span
    /// (unlike [`get_parent_block`](Self::get_parent_block), overlap without
    /// full containment is expected here, not a straddling-range bug).
    pub fn overlapping(&self, arena: &ChunkArena, class: AddrClass, lo: u64, hi: u64) -> Vec<ChunkId> {
        self.iter(class)
            .filter(|&id| {
                arena
                    .get(id)
                    .map(|c| lo < c.end() && hi > c.data)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// O(1) heap-address predicate, maintained alongside inserts. `heap_max`
    /// is the exclusive end of the highest-addressed heap chunk seen so far,
    /// so the comparison here is `<`, not `<=`.
    pub fn is_heap_address(&self, addr: u64) -> bool {
        self.heap_min <= addr && addr < self.heap_max
    }

    pub fn heap_bounds(&self) -> (u64, u64) {
        (self.heap_min, self.heap_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::chunk::{AllocApi, Chunk, ExecutionContext};

    fn chunk(data: u64, size: u64) -> Chunk {
        Chunk::new(
            data,
            size,
            0,
            AddrClass::HeapMalloc,
            AllocApi::Malloc,
            ExecutionContext::default(),
        )
    }

    #[test]
    fn head_insert_and_iteration_order() {
        let mut arena = ChunkArena::new();
        let mut prov = ProvenanceRegistry::new();
        let a = arena.insert(chunk(0x1000, 0x10));
        prov.insert(AddrClass::HeapMalloc, a, &arena);
        let b = arena.insert(chunk(0x2000, 0x10));
        prov.insert(AddrClass::HeapMalloc, b, &arena);
        let order: Vec<_> = prov.iter(AddrClass::HeapMalloc).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn get_parent_block_finds_containing_master() {
        let mut arena = ChunkArena::new();
        let mut prov = ProvenanceRegistry::new();
        let a = arena.insert(chunk(0x1000, 0x40));
        prov.insert(AddrClass::HeapMalloc, a, &arena);
        let found = prov.get_parent_block(&arena, AddrClass::HeapMalloc, 0x1010, 0x10);
        assert_eq!(found, Ok(Some(a)));
        let missing = prov.get_parent_block(&arena, AddrClass::HeapMalloc, 0x5000, 0x10);
        assert_eq!(missing, Ok(None));
    }

    #[test]
    fn get_parent_block_reports_straddling_range_as_invariant_violation() {
        let mut arena = ChunkArena::new();
        let mut prov = ProvenanceRegistry::new();
        let a = arena.insert(chunk(0x1000, 0x10));
        prov.insert(AddrClass::HeapMalloc, a, &arena);
        let result = prov.get_parent_block(&arena, AddrClass::HeapMalloc, 0x1008, 0x20);
        assert_eq!(result, Err(InvariantViolation::StraddlingRange(0x1008, 0x1028)));
    }

    #[test]
    fn heap_bounds_track_inserted_chunks() {
        let mut arena = ChunkArena::new();
        let mut prov = ProvenanceRegistry::new();
        let a = arena.insert(chunk(0x2000, 0x100));
        prov.insert(AddrClass::HeapMalloc, a, &arena);
        assert!(prov.is_heap_address(0x2050));
        assert!(!prov.is_heap_address(0x1000));
    }
}

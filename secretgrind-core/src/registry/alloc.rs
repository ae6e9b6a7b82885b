//! Wraps the host allocator: every malloc/calloc/memalign/realloc/free and
//! mmap/munmap is recorded as a [`Chunk`] with provenance.

use rustc_hash::FxHashMap;

use crate::shadow::{CellState, ShadowMemory};

use super::arena::ChunkArena;
use super::chunk::{AddrClass, AllocApi, Chunk, ChunkId, ExecutionContext, Frame, InstProvenance};
use super::provenance::ProvenanceRegistry;

/// What happened when a chunk was released (`free`/`munmap`). Soft warnings
/// are reported this way rather than as an `Err` (spec.md §7: "freeing... is
/// a soft warning, never fatal").
#[derive(Debug, Clone, Default)]
pub struct ReleaseOutcome {
    /// `Some((offset, len))` relative to the chunk's start, the span of
    /// tainted bytes found still live at release time, if any.
    pub warn_tainted_range: Option<(u64, u64)>,
    pub destroyed: bool,
    pub retained_with_child: bool,
}

pub struct AllocationRegistry {
    pub arena: ChunkArena,
    pub provenance: ProvenanceRegistry,
    active_by_addr: FxHashMap<u64, ChunkId>,
    retained: Vec<ChunkId>,
}

impl Default for AllocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationRegistry {
    pub fn new() -> Self {
        Self {
            arena: ChunkArena::new(),
            provenance: ProvenanceRegistry::new(),
            active_by_addr: FxHashMap::default(),
            retained: Vec::new(),
        }
    }

    pub fn is_heap_address(&self, addr: u64) -> bool {
        self.provenance.is_heap_address(addr)
    }

    /// Record a fresh allocation (malloc/calloc/memalign/new/new[]/mmap...).
    /// `inst` is the marked native instruction that issued the call, if the
    /// host could identify one (spec.md §3's `Chunk.inst`); offline hooks with
    /// no preceding `imark` (e.g. a raw `mmap` event) pass `None`.
    pub fn record_alloc(
        &mut self,
        addr: u64,
        req_size: u64,
        slop_size: u64,
        addr_class: AddrClass,
        api: AllocApi,
        alloc_trace: ExecutionContext,
        inst: Option<InstProvenance>,
    ) -> ChunkId {
        let mut chunk = Chunk::new(addr, req_size, slop_size, addr_class, api, alloc_trace);
        chunk.inst = inst;
        let id = self.arena.insert(chunk);
        self.provenance.insert(addr_class, id, &self.arena);
        self.active_by_addr.insert(addr, id);
        id
    }

    /// Register a sub-region of an existing master chunk (`tnt_subblock_helper.h`).
    /// Fatal assertion if `parent == self` would result, or the parent isn't a
    /// master (spec.md §3 Chunk invariants).
    pub fn register_subblock(
        &mut self,
        parent: ChunkId,
        offset: u64,
        len: u64,
        alloc_trace: ExecutionContext,
        inst: Option<InstProvenance>,
    ) -> ChunkId {
        let (addr, addr_class, api) = {
            let parent_chunk = self
                .arena
                .get(parent)
                .expect("register_subblock: parent chunk missing");
            assert!(parent_chunk.master, "sub-block parent must be a master chunk");
            (parent_chunk.data + offset, parent_chunk.addr_class, parent_chunk.api)
        };
        let mut chunk = Chunk::new(addr, len, 0, addr_class, api, alloc_trace);
        chunk.inst = inst;
        chunk.master = false;
        chunk.parent = Some(parent);
        let id = self.arena.insert(chunk);
        assert_ne!(id, parent, "parent != self");
        self.provenance.insert(addr_class, id, &self.arena);
        if let Some(p) = self.arena.get_mut(parent) {
            p.child_count += 1;
        }
        id
    }

    fn find_active(&self, addr: u64) -> Option<ChunkId> {
        self.active_by_addr.get(&addr).copied()
    }

    /// `free`/`delete`/`delete[]`. A bogus free of an address never observed
    /// returns silently (spec.md §4.2 Failure semantics).
    pub fn free(
        &mut self,
        addr: u64,
        shadow: &mut ShadowMemory,
        warn_on_release: bool,
        remove_on_release: bool,
    ) -> Option<ReleaseOutcome> {
        let id = self.find_active(addr)?;
        self.active_by_addr.remove(&addr);
        Some(self.release_chunk(id, shadow, warn_on_release, remove_on_release))
    }

    fn release_chunk(
        &mut self,
        id: ChunkId,
        shadow: &mut ShadowMemory,
        warn_on_release: bool,
        remove_on_release: bool,
    ) -> ReleaseOutcome {
        let (data, req_size, addr_class, has_child, parent) = {
            let chunk = self.arena.get(id).expect("release_chunk: missing chunk");
            (
                chunk.data,
                chunk.req_size,
                chunk.addr_class,
                chunk.has_child(),
                chunk.parent,
            )
        };

        let mut outcome = ReleaseOutcome::default();
        if warn_on_release || remove_on_release {
            if let Some(range) = first_tainted_subrange(shadow, data, req_size) {
                outcome.warn_tainted_range = Some(range);
            }
        }
        if remove_on_release {
            shadow.set_range(data, req_size, CellState::Untainted);
        }

        if let Some(chunk) = self.arena.get_mut(id) {
            chunk.release_trace = Some(ExecutionContext::default());
        }

        if has_child {
            self.retained.push(id);
            outcome.retained_with_child = true;
        } else {
            self.provenance.remove(addr_class, id);
            self.arena.destroy(id);
            outcome.destroyed = true;
            if let Some(parent_id) = parent {
                self.release_child_of(parent_id);
            }
        }
        outcome
    }

    /// A child of a retained (freed-but-referenced) master was itself
    /// destroyed; if this was the last outstanding child, the master can now
    /// be fully destroyed too.
    fn release_child_of(&mut self, parent: ChunkId) {
        let (destroy_now, addr_class) = {
            let Some(p) = self.arena.get_mut(parent) else {
                return;
            };
            p.child_count = p.child_count.saturating_sub(1);
            (p.child_count == 0 && self.retained.contains(&parent), p.addr_class)
        };
        if destroy_now {
            self.retained.retain(|&id| id != parent);
            self.provenance.remove(addr_class, parent);
            self.arena.destroy(parent);
        }
    }

    /// `mmap`'d or `munmap`'d release path (spec.md §4.3).
    pub fn munmap(
        &mut self,
        addr: u64,
        shadow: &mut ShadowMemory,
        warn_on_release: bool,
        remove_on_release: bool,
    ) -> Option<ReleaseOutcome> {
        self.free(addr, shadow, warn_on_release, remove_on_release)
    }

    /// `realloc`: always a fresh block; copies bytes/shadow taint, releases
    /// the old block per the free rules, and if the new block still has any
    /// tainted byte after the copy, registers it as a fresh taint-origin
    /// event rather than inheriting the old allocation trace verbatim. `inst`
    /// is the marked instruction that issued the `realloc` call, if known; it
    /// becomes both the chunk's `inst` and the basis of its `taint_trace`.
    #[allow(clippy::too_many_arguments)]
    pub fn realloc(
        &mut self,
        old_addr: u64,
        new_addr: u64,
        new_size: u64,
        slop_size: u64,
        shadow: &mut ShadowMemory,
        warn_on_release: bool,
        remove_on_release: bool,
        new_alloc_trace: ExecutionContext,
        inst: Option<InstProvenance>,
    ) -> ChunkId {
        let old_size = self
            .find_active(old_addr)
            .and_then(|id| self.arena.get(id))
            .map(|c| c.req_size)
            .unwrap_or(0);

        let copy_len = old_size.min(new_size);
        if old_addr != new_addr && copy_len > 0 {
            shadow.copy_range(old_addr, new_addr, copy_len);
        }

        self.free(old_addr, shadow, warn_on_release, remove_on_release);

        let id = self.record_alloc(
            new_addr,
            new_size,
            slop_size,
            AddrClass::HeapMalloc,
            AllocApi::Realloc,
            new_alloc_trace,
            inst.clone(),
        );
        if (0..new_size).any(|i| shadow.is_byte_tainted(new_addr + i)) {
            if let Some(chunk) = self.arena.get_mut(id) {
                chunk.taint_trace = Some(match &inst {
                    Some(inst) => ExecutionContext {
                        frames: vec![Frame {
                            pc: inst.addr,
                            description: Some(format!("realloc (inst #{})", inst.id)),
                        }],
                    },
                    None => ExecutionContext::default(),
                });
            }
        }
        id
    }
}

fn first_tainted_subrange(shadow: &mut ShadowMemory, base: u64, len: u64) -> Option<(u64, u64)> {
    let mut start = None;
    let mut end = 0u64;
    for i in 0..len {
        if shadow.is_byte_tainted(base + i) {
            if start.is_none() {
                start = Some(i);
            }
            end = i + 1;
        }
    }
    start.map(|s| (s, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_of_unknown_address_is_a_silent_noop() {
        let mut reg = AllocationRegistry::new();
        let mut shadow = ShadowMemory::default();
        assert!(reg.free(0xDEAD, &mut shadow, true, true).is_none());
    }

    #[test]
    fn free_with_tainted_bytes_warns_and_optionally_untaints() {
        let mut reg = AllocationRegistry::new();
        let mut shadow = ShadowMemory::default();
        reg.record_alloc(0x1000, 64, 0, AddrClass::HeapMalloc, AllocApi::Malloc, ExecutionContext::default(), None);
        shadow.set_range(0x1000, 8, CellState::Tainted);

        let outcome = reg.free(0x1000, &mut shadow, true, true).unwrap();
        assert_eq!(outcome.warn_tainted_range, Some((0, 8)));
        assert!(outcome.destroyed);
        for i in 0..8 {
            assert!(!shadow.is_byte_tainted(0x1000 + i));
        }
    }

    #[test]
    fn realloc_preserves_tainted_byte_count() {
        let mut reg = AllocationRegistry::new();
        let mut shadow = ShadowMemory::default();
        reg.record_alloc(0x1000, 64, 0, AddrClass::HeapMalloc, AllocApi::Malloc, ExecutionContext::default(), None);
        shadow.set_range(0x1000, 16, CellState::Tainted);

        reg.realloc(0x1000, 0x5000, 128, 0, &mut shadow, false, false, ExecutionContext::default(), None);
        let tainted_count = (0..128).filter(|&i| shadow.is_byte_tainted(0x5000 + i)).count();
        assert_eq!(tainted_count, 16);
    }

    #[test]
    fn realloc_with_known_instruction_records_real_taint_trace_and_inst() {
        let mut reg = AllocationRegistry::new();
        let mut shadow = ShadowMemory::default();
        reg.record_alloc(0x1000, 64, 0, AddrClass::HeapMalloc, AllocApi::Malloc, ExecutionContext::default(), None);
        shadow.set_range(0x1000, 16, CellState::Tainted);

        let inst = InstProvenance {
            addr: 0x401000,
            len: 5,
            raw_bytes: Vec::new(),
            mnemonic: None,
            id: 7,
        };
        let id = reg.realloc(
            0x1000,
            0x5000,
            128,
            0,
            &mut shadow,
            false,
            false,
            ExecutionContext::default(),
            Some(inst),
        );
        let chunk = reg.arena.get(id).unwrap();
        assert_eq!(chunk.inst.as_ref().unwrap().id, 7);
        let trace = chunk.taint_trace.as_ref().expect("tainted realloc gets a taint trace");
        assert_eq!(trace.frames.len(), 1);
        assert_eq!(trace.frames[0].pc, 0x401000);
    }

    #[test]
    fn chunk_with_child_is_retained_not_destroyed() {
        let mut reg = AllocationRegistry::new();
        let mut shadow = ShadowMemory::default();
        let parent = reg.record_alloc(0x1000, 64, 0, AddrClass::HeapMalloc, AllocApi::Malloc, ExecutionContext::default(), None);
        let _child = reg.register_subblock(parent, 8, 16, ExecutionContext::default(), None);

        let outcome = reg.free(0x1000, &mut shadow, false, false).unwrap();
        assert!(outcome.retained_with_child);
        assert!(!outcome.destroyed);
        assert!(reg.arena.get(parent).is_some());
    }
}

//! The public shadow-memory API: [`ShadowMemory`] ties the two-level address
//! map, the partial-byte side-table, and the endianness-aware load/store
//! helpers into the operations the IR instrumentation and syscall hooks use.

use byteorder::{BigEndian, ByteOrder};

use super::cell::CellState;
use super::primary_map::{AddressMap, Residency, SmStats};
use super::secondary_map::SM_BYTES;
use super::side_table::SideTable;

/// Default low-prefix size covered by the flat primary array (32 GiB), matching
/// the original's 64-bit default.
pub const DEFAULT_PRIMARY_PREFIX: u64 = 32 * 1024 * 1024 * 1024;

pub struct ShadowMemory {
    map: AddressMap,
    side_table: SideTable,
}

impl Default for ShadowMemory {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_PREFIX)
    }
}

#[inline]
fn split(addr: u64) -> (u64, u16) {
    (addr >> 16, (addr & (SM_BYTES - 1)) as u16)
}

impl ShadowMemory {
    pub fn new(primary_prefix_bytes: u64) -> Self {
        Self {
            map: AddressMap::new(primary_prefix_bytes),
            side_table: SideTable::new(),
        }
    }

    pub fn stats(&self) -> SmStats {
        self.map.stats
    }

    pub fn side_table_len(&self) -> usize {
        self.side_table.len()
    }

    pub fn gc_side_table(&mut self) {
        self.side_table.gc();
    }

    /// Shadow reads never fail: an unmapped (`NoAccess`) byte degrades to the
    /// canonical untainted pattern, but the anomaly is reported rather than
    /// silently swallowed.
    #[inline]
    fn read_byte_exact(&mut self, addr: u64) -> u8 {
        let (idx, off) = split(addr);
        match self.map.read(idx, off) {
            CellState::PartUntainted => self.side_table.get_byte(addr),
            CellState::NoAccess => {
                log::warn!("shadow read of a NOACCESS byte at 0x{addr:x}, reporting as untainted");
                CellState::NoAccess.canonical_byte()
            }
            other => other.canonical_byte(),
        }
    }

    #[inline]
    fn write_byte_exact(&mut self, addr: u64, value: u8) {
        let (idx, off) = split(addr);
        let state = CellState::classify(value);
        self.map.write_slot(idx).set(off, state);
        if state == CellState::PartUntainted {
            self.side_table.set_byte(addr, value);
        } else {
            self.side_table.clear_byte(addr);
        }
    }

    pub fn is_byte_tainted(&mut self, addr: u64) -> bool {
        let (idx, off) = split(addr);
        match self.map.read(idx, off) {
            CellState::Tainted => true,
            CellState::PartUntainted => self.side_table.get_byte(addr) != 0,
            CellState::NoAccess | CellState::Untainted => false,
        }
    }

    /// Bulk-assign a uniform state to `[addr, addr+len)`. `state` must not be
    /// `PartUntainted` — that state only ever arises byte-by-byte.
    pub fn set_range(&mut self, addr: u64, len: u64, state: CellState) {
        debug_assert_ne!(state, CellState::PartUntainted);
        if len == 0 {
            return;
        }
        self.side_table.clear_range(addr, len);
        let end = addr + len;
        let mut cur = addr;
        while cur < end {
            let sm_index = cur >> 16;
            let sm_base = sm_index << 16;
            let sm_end = sm_base + SM_BYTES;
            let range_end = end.min(sm_end);
            let off_start = (cur - sm_base) as u16;
            let off_end = (range_end - sm_base) as u16;
            if off_start == 0 && off_end as u64 == SM_BYTES {
                self.map.assign_distinguished(sm_index, state);
            } else {
                self.map.write_slot(sm_index).fill_range(off_start, off_end, state);
            }
            cur = range_end;
        }
    }

    /// Copy `len` bytes from `src` to `dst`, preserving partial-byte side-table
    /// content. Correct for overlapping regions (iterates in the safe direction,
    /// like `memmove`).
    pub fn copy_range(&mut self, src: u64, dst: u64, len: u64) {
        if len == 0 || src == dst {
            return;
        }
        if dst > src && dst < src + len {
            for i in (0..len).rev() {
                let v = self.read_byte_exact(src + i);
                self.write_byte_exact(dst + i, v);
            }
        } else {
            for i in 0..len {
                let v = self.read_byte_exact(src + i);
                self.write_byte_exact(dst + i, v);
            }
        }
    }

    /// Address (within `[addr, addr+len)`) holding the byte of given
    /// significance rank (`0` = most significant), honoring endianness.
    #[inline]
    fn addr_of_rank(addr: u64, len: u64, rank: u64, big_endian: bool) -> u64 {
        if big_endian {
            addr + rank
        } else {
            addr + (len - 1 - rank)
        }
    }

    /// Load `len` bytes starting at `addr`, returned most-significant-byte
    /// first regardless of the guest's own endianness (i.e. already
    /// normalized for composing into a `u64`/`u128` with `BigEndian`). Each
    /// byte is the canonical taint pattern (`0x00`/`0xff`) unless it was
    /// partially tainted, in which case the exact 8-bit shadow value is
    /// returned.
    pub fn load_bytes_msb_first(&mut self, addr: u64, len: u64, big_endian: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(len as usize);
        for rank in 0..len {
            let a = Self::addr_of_rank(addr, len, rank, big_endian);
            out.push(self.read_byte_exact(a));
        }
        out
    }

    pub fn store_bytes_msb_first(&mut self, addr: u64, len: u64, big_endian: bool, bytes: &[u8]) {
        debug_assert_eq!(bytes.len() as u64, len);
        for rank in 0..len {
            let a = Self::addr_of_rank(addr, len, rank, big_endian);
            self.write_byte_exact(a, bytes[rank as usize]);
        }
    }

    pub fn load_v8(&mut self, addr: u64) -> u8 {
        self.read_byte_exact(addr)
    }

    pub fn store_v8(&mut self, addr: u64, value: u8) {
        self.write_byte_exact(addr, value);
    }

    pub fn load_v16(&mut self, addr: u64, big_endian: bool) -> u16 {
        let buf = self.load_bytes_msb_first(addr, 2, big_endian);
        BigEndian::read_u16(&buf)
    }

    pub fn store_v16(&mut self, addr: u64, value: u16, big_endian: bool) {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.store_bytes_msb_first(addr, 2, big_endian, &buf);
    }

    pub fn load_v32(&mut self, addr: u64, big_endian: bool) -> u32 {
        let buf = self.load_bytes_msb_first(addr, 4, big_endian);
        BigEndian::read_u32(&buf)
    }

    pub fn store_v32(&mut self, addr: u64, value: u32, big_endian: bool) {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value);
        self.store_bytes_msb_first(addr, 4, big_endian, &buf);
    }

    pub fn load_v64(&mut self, addr: u64, big_endian: bool) -> u64 {
        let buf = self.load_bytes_msb_first(addr, 8, big_endian);
        BigEndian::read_u64(&buf)
    }

    pub fn store_v64(&mut self, addr: u64, value: u64, big_endian: bool) {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value);
        self.store_bytes_msb_first(addr, 8, big_endian, &buf);
    }

    pub fn load_v128(&mut self, addr: u64, big_endian: bool) -> u128 {
        let buf = self.load_bytes_msb_first(addr, 16, big_endian);
        BigEndian::read_u128(&buf)
    }

    pub fn store_v128(&mut self, addr: u64, value: u128, big_endian: bool) {
        let mut buf = [0u8; 16];
        BigEndian::write_u128(&mut buf, value);
        self.store_bytes_msb_first(addr, 16, big_endian, &buf);
    }

    /// 256-bit (AVX) load/store has no native integer type; callers get the
    /// raw most-significant-first byte buffer.
    pub fn load_v256(&mut self, addr: u64, big_endian: bool) -> [u8; 32] {
        let buf = self.load_bytes_msb_first(addr, 32, big_endian);
        let mut out = [0u8; 32];
        out.copy_from_slice(&buf);
        out
    }

    pub fn store_v256(&mut self, addr: u64, value: &[u8; 32], big_endian: bool) {
        self.store_bytes_msb_first(addr, 32, big_endian, value);
    }

    /// Every maximal run of tainted bytes, in ascending address order. A run
    /// never crosses an SM boundary — the summary engine's coalescing breaks
    /// there too (spec.md §4.6), so each SM can be scanned independently
    /// rather than needing a global sweep over the whole address space.
    pub fn tainted_runs(&mut self) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        for (sm_index, residency) in self.map.resident_sms() {
            let base = sm_index << 16;
            match residency {
                Residency::FullyTainted => out.push((base, base + SM_BYTES)),
                Residency::NeedsScan => {
                    let mut run_start: Option<u64> = None;
                    for off in 0..SM_BYTES {
                        let addr = base + off;
                        if self.is_byte_tainted(addr) {
                            run_start.get_or_insert(addr);
                        } else if let Some(start) = run_start.take() {
                            out.push((start, addr));
                        }
                    }
                    if let Some(start) = run_start {
                        out.push((start, base + SM_BYTES));
                    }
                }
            }
        }
        out
    }
}

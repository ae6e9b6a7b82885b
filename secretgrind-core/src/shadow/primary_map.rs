//! The two-level address-to-secondary-map lookup: a flat primary array over a
//! configurable low prefix of the address space, backed for everything above
//! that prefix by a small MRU cache (`L1`) in front of an ordered map (`L2`).

use std::collections::BTreeMap;

use super::cell::CellState;
use super::secondary_map::SecondaryMap;

/// One slot in either the primary array or the auxiliary map: either one of
/// the three shared, read-only distinguished pages, or a privately-owned,
/// copy-on-write-allocated secondary map.
pub enum SmSlot {
    Distinguished(CellState),
    Private(Box<SecondaryMap>),
}

impl SmSlot {
    fn get(&self, offset: u16) -> CellState {
        match self {
            SmSlot::Distinguished(s) => *s,
            SmSlot::Private(sm) => sm.get(offset),
        }
    }

    /// Returns a mutable private SM, copying-for-write out of a distinguished
    /// slot first if necessary. Returns whether a copy happened (for stats).
    fn make_private(&mut self) -> (&mut SecondaryMap, bool) {
        let copied = matches!(self, SmSlot::Distinguished(_));
        if let SmSlot::Distinguished(s) = *self {
            *self = SmSlot::Private(Box::new(SecondaryMap::uniform(s)));
        }
        match self {
            SmSlot::Private(sm) => (sm, copied),
            SmSlot::Distinguished(_) => unreachable!(),
        }
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct SmStats {
    pub private_issued: u64,
    pub private_deissued: u64,
    pub noaccess_sms: u64,
    pub tainted_sms: u64,
    pub untainted_sms: u64,
}

impl SmStats {
    fn record_distinguished(&mut self, state: CellState) {
        match state {
            CellState::NoAccess => self.noaccess_sms += 1,
            CellState::Tainted => self.tainted_sms += 1,
            CellState::Untainted => self.untainted_sms += 1,
            CellState::PartUntainted => unreachable!("no distinguished partuntainted SM"),
        }
    }
}

const L1_CAPACITY: usize = 24;

#[derive(Default)]
struct L1Cache {
    /// Front-most-recent first. `sm_index` values only; backing data lives in `L2`.
    entries: Vec<u64>,
}

impl L1Cache {
    fn touch(&mut self, sm_index: u64) {
        if let Some(pos) = self.entries.iter().position(|&i| i == sm_index) {
            let v = self.entries.remove(pos);
            self.entries.insert(0, v);
        } else {
            if self.entries.len() >= L1_CAPACITY {
                self.entries.pop();
            }
            self.entries.insert(0, sm_index);
        }
    }

    fn contains(&self, sm_index: u64) -> bool {
        self.entries.contains(&sm_index)
    }
}

/// The primary array plus the high-address auxiliary cache.
pub struct AddressMap {
    primary: Vec<SmSlot>,
    primary_sm_count: u64,
    l1: L1Cache,
    l2: BTreeMap<u64, SmSlot>,
    pub stats: SmStats,
}

impl AddressMap {
    /// `low_prefix_bytes` must be a multiple of [`super::secondary_map::SM_BYTES`].
    pub fn new(low_prefix_bytes: u64) -> Self {
        let primary_sm_count = low_prefix_bytes / super::secondary_map::SM_BYTES;
        let mut primary = Vec::with_capacity(primary_sm_count as usize);
        primary.resize_with(primary_sm_count as usize, || {
            SmSlot::Distinguished(CellState::NoAccess)
        });
        let mut stats = SmStats::default();
        stats.noaccess_sms = primary_sm_count;
        Self {
            primary,
            primary_sm_count,
            l1: L1Cache::default(),
            l2: BTreeMap::new(),
            stats,
        }
    }

    #[inline]
    fn in_primary(&self, sm_index: u64) -> bool {
        sm_index < self.primary_sm_count
    }

    pub fn read(&mut self, sm_index: u64, offset: u16) -> CellState {
        if self.in_primary(sm_index) {
            return self.primary[sm_index as usize].get(offset);
        }
        self.l1.touch(sm_index);
        match self.l2.get(&sm_index) {
            Some(slot) => slot.get(offset),
            None => CellState::NoAccess,
        }
    }

    /// Returns a mutable private SM for `sm_index`, copying-for-write from a
    /// distinguished slot (or materializing a fresh noaccess one in the aux
    /// map) as needed.
    pub fn write_slot(&mut self, sm_index: u64) -> &mut SecondaryMap {
        if self.in_primary(sm_index) {
            let slot = &mut self.primary[sm_index as usize];
            let (sm, copied) = slot.make_private();
            if copied {
                self.stats.private_issued += 1;
            }
            return sm;
        }
        self.l1.touch(sm_index);
        let slot = self
            .l2
            .entry(sm_index)
            .or_insert(SmSlot::Distinguished(CellState::NoAccess));
        let (sm, copied) = slot.make_private();
        if copied {
            self.stats.private_issued += 1;
        }
        sm
    }

    /// Wholesale-replace an entire SM with a distinguished page, freeing any
    /// private SM it held.
    pub fn assign_distinguished(&mut self, sm_index: u64, state: CellState) {
        self.stats.record_distinguished(state);
        if self.in_primary(sm_index) {
            if matches!(self.primary[sm_index as usize], SmSlot::Private(_)) {
                self.stats.private_deissued += 1;
            }
            self.primary[sm_index as usize] = SmSlot::Distinguished(state);
            return;
        }
        self.l1.touch(sm_index);
        if let Some(SmSlot::Private(_)) = self.l2.get(&sm_index) {
            self.stats.private_deissued += 1;
        }
        self.l2.insert(sm_index, SmSlot::Distinguished(state));
    }

    /// Is `sm_index` currently resident in the fast L1 front-list? (diagnostic only)
    pub fn is_l1_hot(&self, sm_index: u64) -> bool {
        !self.in_primary(sm_index) && self.l1.contains(sm_index)
    }

    /// Every SM that could possibly hold a tainted byte, classified so the
    /// summary engine can skip a per-cell scan where it's unnecessary:
    /// all-`NoAccess`/all-`Untainted` SMs contribute nothing and are omitted
    /// entirely, an all-`Tainted` SM is reported without inspecting a single
    /// cell, and a `Private` SM (the only state that can hold a mix) has to
    /// be scanned cell-by-cell. Returned in ascending `sm_index` order.
    pub fn resident_sms(&self) -> Vec<(u64, Residency)> {
        let mut out = Vec::new();
        for (i, slot) in self.primary.iter().enumerate() {
            if let Some(r) = Residency::of(slot) {
                out.push((i as u64, r));
            }
        }
        for (&idx, slot) in self.l2.iter() {
            if let Some(r) = Residency::of(slot) {
                out.push((idx, r));
            }
        }
        out
    }
}

/// How a resident SM needs to be handled by a full-memory scan (the summary
/// engine is the only consumer so far).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    FullyTainted,
    NeedsScan,
}

impl Residency {
    fn of(slot: &SmSlot) -> Option<Self> {
        match slot {
            SmSlot::Distinguished(CellState::NoAccess) | SmSlot::Distinguished(CellState::Untainted) => None,
            SmSlot::Distinguished(CellState::Tainted) => Some(Residency::FullyTainted),
            SmSlot::Distinguished(CellState::PartUntainted) => unreachable!("no distinguished partuntainted SM"),
            SmSlot::Private(_) => Some(Residency::NeedsScan),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_map_is_all_noaccess() {
        let mut m = AddressMap::new(4 * super::super::secondary_map::SM_BYTES);
        assert_eq!(m.read(0, 0), CellState::NoAccess);
        assert_eq!(m.read(3, 1234), CellState::NoAccess);
    }

    #[test]
    fn write_then_read_primary_and_aux() {
        let mut m = AddressMap::new(2 * super::super::secondary_map::SM_BYTES);
        m.write_slot(0).set(10, CellState::Tainted);
        assert_eq!(m.read(0, 10), CellState::Tainted);

        // sm_index 5 is beyond the 2-SM primary prefix => served by aux map.
        m.write_slot(5).set(20, CellState::Tainted);
        assert_eq!(m.read(5, 20), CellState::Tainted);
        assert_eq!(m.read(5, 21), CellState::NoAccess);
    }

    #[test]
    fn distinguished_swap_frees_private_sm() {
        let mut m = AddressMap::new(super::super::secondary_map::SM_BYTES);
        m.write_slot(0).set(3, CellState::Tainted);
        m.assign_distinguished(0, CellState::Untainted);
        assert_eq!(m.read(0, 3), CellState::Untainted);
        assert_eq!(m.stats.private_deissued, 1);
    }
}

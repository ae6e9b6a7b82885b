//! The two-stage 128/256-bit SIMD load protocol (spec.md §4.4): wide vector
//! loads are split by the front-end into a `SimdLoadPrepare` (captures the
//! address temp) immediately followed by one or more `SimdLoadCommit`s (the
//! actual shadow reads). The pairing is mandatory — a commit with no matching
//! prepare, or one whose `(addr, offset)` doesn't match, is an invariant
//! violation, not a recoverable condition.

use crate::error::InvariantViolation;

use super::taint_table::TempId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    addr: TempId,
    offset: u64,
}

/// Tracks the single outstanding `SimdLoadPrepare` for the current basic
/// block. Block-scoped, like [`super::taint_table::TempTaintTable`].
#[derive(Default)]
pub struct SimdGate {
    pending: Option<Pending>,
}

impl SimdGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh block has no outstanding prepare.
    pub fn start_block(&mut self) {
        self.pending = None;
    }

    pub fn prepare(&mut self, addr: TempId, offset: u64) {
        self.pending = Some(Pending { addr, offset });
    }

    /// Consumes and validates the pending prepare against this commit's
    /// `(addr, offset)`. Returns `Err` on mismatch or a missing prepare —
    /// this is the fatal-assertion contract spec.md §4.4 calls for, since a
    /// mismatch means the front-end's IR lowering is broken, not a
    /// guest-data problem; the caller (ultimately `main`) turns this into a
    /// process abort rather than attempting to keep going.
    pub fn commit(&mut self, addr: TempId, offset: u64) -> Result<(), InvariantViolation> {
        let pending = self.pending.take().ok_or(InvariantViolation::SimdProtocolMismatch)?;
        if pending != (Pending { addr, offset }) {
            return Err(InvariantViolation::SimdProtocolMismatch);
        }
        Ok(())
    }
}

//! Trait boundary for the collaborator interfaces spec.md §6 says the engine
//! *consumes* from the host DBI framework and its disassembler, both
//! deliberately out of scope to reimplement (spec.md §1). Modeling them as
//! traits here means the engine compiles and is unit-testable with fakes,
//! and a real DBI front-end (or, in this repo, the offline trace replayer)
//! just has to implement them.

use crate::registry::{AddrClass, ExecutionContext};

/// What kind of thing a guest address resolves to, per spec.md §6's
/// "address-description API" (`SectKind`, `Block`, `Stack`, `DataSym`,
/// `Variable`, …).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressDescription {
    /// Inside a known stack allocation.
    Stack,
    /// Inside a code block of a loaded object (used for mnemonics/symbolization,
    /// not taint tracking itself).
    CodeBlock { object: String, offset: u64 },
    /// A named global/static data symbol.
    DataSym { name: String },
    /// A named local/debug-info variable, with its declared extent.
    Variable { name: String, size: u64 },
    /// Resolved to an address class but no finer-grained name.
    Unknown { class: AddrClass },
}

/// Resolves an address to a human name, the way the original tool's debug-info
/// layer backs `var-name` / `summary-verbose` output. A host with no debug
/// info available can always return `AddressDescription::Unknown`.
pub trait AddressDescriber {
    fn describe(&self, addr: u64) -> AddressDescription;
}

/// Captures the guest's current call stack, used to build the `alloc_trace`/
/// `release_trace`/`taint_trace` fields on a [`crate::registry::Chunk`].
pub trait StackTraceCapture {
    fn capture(&self) -> ExecutionContext;
}

/// Given `(addr, len)`, renders a mnemonic string — used only when the
/// `mnemonics` option is enabled (spec.md §6). Deliberately out of scope to
/// reimplement; a host with no disassembler available can return `None`.
pub trait Disassembler {
    fn disassemble(&self, addr: u64, len: u8) -> Option<String>;
}

/// Everything else the engine needs from the DBI host itself: the guest's
/// current instruction pointer, whether the call stack is currently inside
/// `main` (used by the summary engine's "end of `main`" trigger, spec.md
/// §4.6), and the running guest's pid/tid, used in trace/summary output and
/// in synthesized anonymous chunk names (`@0xADDR_class_pid_tid`, spec.md §7).
pub trait DbiHost: AddressDescriber + StackTraceCapture {
    fn pid(&self) -> u32;
    fn tid(&self) -> u32;
    /// True once the guest's call stack has unwound below `main`'s frame —
    /// the "end of main" summary trigger fires on the transition from `false`
    /// to `true` (spec.md §4.6).
    fn is_below_main(&self) -> bool;
}

//! Instrumentation of the guest's IR: per-statement taint propagation rules,
//! the temp/register taint tables they operate on, the SIMD wide-load
//! protocol, and the human-readable instruction trace.

pub mod propagation;
pub mod simd;
pub mod stmt;
pub mod taint_table;
pub mod trace;

pub use propagation::{apply, BlockContext};
pub use simd::SimdGate;
pub use stmt::{IrExpr, IrStmt};
pub use taint_table::{RegOffset, RegTaintTable, TaintCell, TempId, TempTaintTable};
pub use trace::{TraceEvent, TraceMode, TraceToggles};

//! The IR shapes the instrumentation component recognizes, per spec.md §4.4's
//! per-statement propagation table. This is a minimal, host-independent
//! stand-in for the DBI front-end's real IR (out of scope per spec.md §1);
//! a real host's IR lowers onto these shapes before calling into the engine.

use super::taint_table::{RegOffset, TempId};

#[derive(Debug, Clone)]
pub enum IrExpr {
    /// `tmp = const`; always untainted, but the literal value is kept (VEX-style
    /// `Iex_Const`) since address computation for a later load/store is often
    /// nothing more than a constant pointer.
    Const(u64),
    /// `tmp = rd_tmp(x)`
    RdTmp(TempId),
    /// `tmp = unop(x)`
    Unop(TempId),
    /// `tmp = binop(a, b)`
    Binop(TempId, TempId),
    /// `tmp = triop(a, b, c)`
    Triop(TempId, TempId, TempId),
    /// `tmp = qop(a, b, c, d)`
    Qop(TempId, TempId, TempId, TempId),
    /// `tmp = ite(c, a, b)`; `c`'s taint is not propagated into the value.
    Ite { cond: TempId, t: TempId, f: TempId },
    /// `tmp = get(reg)`
    GetReg(RegOffset),
    /// `tmp = load ty addr`
    Load {
        addr: TempId,
        size_bytes: u8,
        big_endian: bool,
    },
}

#[derive(Debug, Clone)]
pub enum IrStmt {
    /// Defines a temp from an expression.
    WriteTmp { tmp: TempId, expr: IrExpr },
    /// `put(reg) = tmp`
    PutReg { reg: RegOffset, value: TempId },
    /// `store addr = tmp`
    Store {
        addr: TempId,
        value: TempId,
        size_bytes: u8,
        big_endian: bool,
    },
    /// `exit guard -> target`; no state change, only a trace event when tainted.
    ExitGuard { guard: TempId, target: u64 },
    /// Marks the start of a new native instruction; assigns the monotonic ID.
    IMark { addr: u64, len: u8 },
    /// First half of a 128/256-bit SIMD load: captures the address temp and a
    /// byte offset. Must be immediately followed by a matching `SimdLoadCommit`.
    SimdLoadPrepare { addr: TempId, offset: u64 },
    /// Second half: performs the actual `width_bytes`-wide shadow load. The
    /// `(addr, offset)` pair must match the most recent `SimdLoadPrepare` —
    /// violation is a fatal assertion (spec.md §4.4).
    SimdLoadCommit {
        tmp: TempId,
        addr: TempId,
        offset: u64,
        width_bytes: u8,
        big_endian: bool,
    },
}

//! Per-statement taint propagation rules (spec.md §4.4): given one [`IrStmt`]
//! and the current block/register taint tables, updates taint state and
//! produces a trace event when tracing is enabled for the statement.

use crate::error::InvariantViolation;
use crate::registry::InstProvenance;
use crate::shadow::ShadowMemory;

use super::simd::SimdGate;
use super::stmt::{IrExpr, IrStmt};
use super::taint_table::{RegTaintTable, TempTaintTable};
use super::trace::{TraceEvent, TraceToggles};

/// Everything one basic block's instrumentation needs. Registers persist
/// across blocks; temps and the SIMD gate are block-scoped.
pub struct BlockContext<'a> {
    pub temps: &'a mut TempTaintTable,
    pub regs: &'a mut RegTaintTable,
    pub shadow: &'a mut ShadowMemory,
    pub simd: &'a mut SimdGate,
    pub trace: &'a TraceToggles,
    pub pid: u32,
    pub fn_name: &'a str,
    /// When set, address-taint does not propagate into the value loaded from
    /// that address — only explicit data already marked tainted does
    /// (spec.md §4.4 "taint-data-flow only" mode).
    pub taint_data_flow_only: bool,
    /// Monotonic counter bumped by every `imark`; persists across blocks like
    /// `regs` does, so IDs stay unique for the life of the replayed process.
    pub inst_counter: &'a mut u64,
    /// The most recently marked native instruction, kept around so an
    /// allocation/taint event recorded shortly after can attach it as
    /// provenance. Cleared by nothing — it simply tracks "last imark seen".
    pub current_inst: &'a mut Option<InstProvenance>,
}

fn expr_taint(temps: &TempTaintTable, expr: &IrExpr, regs: &RegTaintTable) -> bool {
    match expr {
        IrExpr::Const(_) => false,
        IrExpr::RdTmp(x) => temps.is_tainted(*x),
        IrExpr::Unop(x) => temps.is_tainted(*x),
        IrExpr::Binop(a, b) => temps.is_tainted(*a) || temps.is_tainted(*b),
        IrExpr::Triop(a, b, c) => temps.is_tainted(*a) || temps.is_tainted(*b) || temps.is_tainted(*c),
        IrExpr::Qop(a, b, c, d) => {
            temps.is_tainted(*a) || temps.is_tainted(*b) || temps.is_tainted(*c) || temps.is_tainted(*d)
        }
        // The condition's own taint is surfaced only in the trace (below),
        // never merged into the resulting value: spec.md §4.4 is explicit
        // that `ite` is not a "control taints data" rule.
        IrExpr::Ite { t, f, .. } => temps.is_tainted(*t) || temps.is_tainted(*f),
        IrExpr::GetReg(r) => regs.is_tainted(*r),
        IrExpr::Load { .. } => false, // handled specially in apply(), needs shadow + addr taint
    }
}

fn expr_value(temps: &TempTaintTable, expr: &IrExpr, regs: &RegTaintTable) -> u64 {
    match expr {
        IrExpr::Const(v) => *v,
        IrExpr::RdTmp(x) | IrExpr::Unop(x) => temps.get(*x).last_value,
        IrExpr::Binop(a, _) => temps.get(*a).last_value,
        IrExpr::Triop(a, _, _) => temps.get(*a).last_value,
        IrExpr::Qop(a, _, _, _) => temps.get(*a).last_value,
        IrExpr::Ite { cond, t, f } => {
            if temps.get(*cond).last_value != 0 {
                temps.get(*t).last_value
            } else {
                temps.get(*f).last_value
            }
        }
        IrExpr::GetReg(r) => regs.get(*r).last_value,
        IrExpr::Load { addr, .. } => temps.get(*addr).last_value,
    }
}

/// Applies one statement, updating `ctx`'s tables/shadow memory in place and
/// returning a [`TraceEvent`] iff the current trace mode wants one. `Err`
/// only ever comes from a SIMD commit whose prepare doesn't match — an
/// invariant violation the caller (ultimately `main`) turns into a process
/// abort rather than attempting to keep going.
pub fn apply(ctx: &mut BlockContext<'_>, stmt: &IrStmt) -> Result<Option<TraceEvent>, InvariantViolation> {
    match stmt {
        IrStmt::WriteTmp { tmp, expr } => Ok(apply_write_tmp(ctx, *tmp, expr)),
        IrStmt::PutReg { reg, value } => {
            let cell = ctx.temps.get(*value);
            ctx.regs.write(*reg, cell.tainted, cell.last_value);
            Ok(emit(ctx, cell.tainted, "PUT", cell.last_value, format!("t{value} -> reg[{reg}]")))
        }
        IrStmt::Store {
            addr,
            value,
            size_bytes,
            big_endian,
        } => Ok(apply_store(ctx, *addr, *value, *size_bytes, *big_endian)),
        IrStmt::ExitGuard { guard, target } => {
            let tainted = ctx.temps.is_tainted(*guard);
            Ok(emit(ctx, tainted, "EXIT", *target, format!("guard t{guard} tainted")))
        }
        IrStmt::IMark { addr, len } => {
            *ctx.inst_counter += 1;
            *ctx.current_inst = Some(InstProvenance {
                addr: *addr,
                len: *len,
                raw_bytes: Vec::new(),
                mnemonic: None,
                id: *ctx.inst_counter,
            });
            Ok(None)
        }
        IrStmt::SimdLoadPrepare { addr, offset } => {
            ctx.simd.prepare(*addr, *offset);
            Ok(None)
        }
        IrStmt::SimdLoadCommit {
            tmp,
            addr,
            offset,
            width_bytes,
            big_endian,
        } => apply_simd_commit(ctx, *tmp, *addr, *offset, *width_bytes, *big_endian),
    }
}

fn apply_write_tmp(ctx: &mut BlockContext<'_>, tmp: u32, expr: &IrExpr) -> Option<TraceEvent> {
    if let IrExpr::Load {
        addr,
        size_bytes,
        big_endian,
    } = expr
    {
        return apply_load(ctx, tmp, *addr, *size_bytes, *big_endian);
    }

    let tainted = expr_taint(ctx.temps, expr, ctx.regs);
    let value = expr_value(ctx.temps, expr, ctx.regs);
    ctx.temps.write(tmp, tainted, value);
    emit(ctx, tainted, "WRTMP", value, format!("-> t{tmp}"))
}

fn apply_load(
    ctx: &mut BlockContext<'_>,
    tmp: u32,
    addr: u32,
    size_bytes: u8,
    big_endian: bool,
) -> Option<TraceEvent> {
    let addr_cell = ctx.temps.get(addr);
    let data_tainted = match size_bytes {
        1 => ctx.shadow.load_v8(addr_cell.last_value) != 0,
        2 => ctx.shadow.load_v16(addr_cell.last_value, big_endian) != 0,
        4 => ctx.shadow.load_v32(addr_cell.last_value, big_endian) != 0,
        8 => ctx.shadow.load_v64(addr_cell.last_value, big_endian) != 0,
        _ => (0..size_bytes as u64).any(|i| ctx.shadow.is_byte_tainted(addr_cell.last_value + i)),
    };
    let addr_taint = if ctx.taint_data_flow_only {
        false
    } else {
        addr_cell.tainted
    };
    let tainted = data_tainted || addr_taint;
    ctx.temps.write(tmp, tainted, addr_cell.last_value);
    emit(
        ctx,
        tainted,
        "LOAD",
        addr_cell.last_value,
        format!("[t{addr}] -> t{tmp}, size={size_bytes}"),
    )
}

fn apply_store(
    ctx: &mut BlockContext<'_>,
    addr: u32,
    value: u32,
    size_bytes: u8,
    big_endian: bool,
) -> Option<TraceEvent> {
    let addr_cell = ctx.temps.get(addr);
    let value_cell = ctx.temps.get(value);
    let state = if value_cell.tainted {
        crate::shadow::CellState::Tainted
    } else {
        crate::shadow::CellState::Untainted
    };
    ctx.shadow.set_range(addr_cell.last_value, size_bytes as u64, state);
    if !ctx.taint_data_flow_only && addr_cell.tainted {
        ctx.shadow
            .set_range(addr_cell.last_value, size_bytes as u64, crate::shadow::CellState::Tainted);
    }
    let tainted = value_cell.tainted || (!ctx.taint_data_flow_only && addr_cell.tainted);
    emit(
        ctx,
        tainted,
        "STORE",
        addr_cell.last_value,
        format!("t{value} -> [t{addr}], size={size_bytes}"),
    )
}

fn apply_simd_commit(
    ctx: &mut BlockContext<'_>,
    tmp: u32,
    addr: u32,
    offset: u64,
    width_bytes: u8,
    big_endian: bool,
) -> Result<Option<TraceEvent>, InvariantViolation> {
    ctx.simd.commit(addr, offset)?;
    let addr_cell = ctx.temps.get(addr);
    let base = addr_cell.last_value + offset;
    let data_tainted = (0..width_bytes as u64).any(|i| ctx.shadow.is_byte_tainted(base + i));
    let _ = big_endian;
    let tainted = data_tainted || (!ctx.taint_data_flow_only && addr_cell.tainted);
    ctx.temps.write(tmp, tainted, base);
    Ok(emit(
        ctx,
        tainted,
        "SIMD_LOAD",
        base,
        format!("[t{addr}+{offset}] -> t{tmp}, width={width_bytes}"),
    ))
}

fn emit(ctx: &BlockContext<'_>, tainted: bool, ir_desc: &str, value: u64, flow: String) -> Option<TraceEvent> {
    if !ctx.trace.should_emit(tainted) {
        return None;
    }
    Some(TraceEvent {
        pid: ctx.pid,
        fn_name: ctx.fn_name.to_string(),
        ir_desc: ir_desc.to_string(),
        value,
        taint_mask: if tainted { u64::MAX } else { 0 },
        flow,
    })
}

//! Human-readable instruction trace: `==PID== FN | IR | 0xVALUE | 0xTAINT | flow`.
//! This is the tool's primary stdout product (spec.md §6), so it is written
//! directly rather than routed through `log` — `log` is reserved for the
//! ambient diagnostics (config problems, GC activity, soft warnings).

use std::fmt;

use super::taint_table::TempId;

/// One traced IR operation.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub pid: u32,
    pub fn_name: String,
    pub ir_desc: String,
    pub value: u64,
    pub taint_mask: u64,
    pub flow: String,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "=={}== {} | {} | 0x{:x} | 0x{:x} | {}",
            self.pid, self.fn_name, self.ir_desc, self.value, self.taint_mask, self.flow
        )
    }
}

/// The three independently toggleable trace modes a guest can request via
/// client requests (spec.md §4.6): emit a line for every IR op, emit a line
/// only for ops touching tainted data, or suppress tracing entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    Off,
    TaintedOnly,
    All,
}

/// Trace enablement is requested by the guest as nested client requests
/// (`TNT_TRACE_ON`/`TNT_TRACE_OFF` inside sandboxes that may themselves
/// nest) — a plain bool would clobber the outer scope's wish when an inner
/// sandbox exits, so this tracks a nesting counter per mode instead
/// (original_source's `tnt_main.c` sandbox-nesting behavior, not present in
/// the distilled spec).
#[derive(Debug, Default)]
pub struct TraceToggles {
    all_depth: u32,
    tainted_only_depth: u32,
}

impl TraceToggles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mode: TraceMode) {
        match mode {
            TraceMode::All => self.all_depth += 1,
            TraceMode::TaintedOnly => self.tainted_only_depth += 1,
            TraceMode::Off => {}
        }
    }

    pub fn pop(&mut self, mode: TraceMode) {
        match mode {
            TraceMode::All => self.all_depth = self.all_depth.saturating_sub(1),
            TraceMode::TaintedOnly => self.tainted_only_depth = self.tainted_only_depth.saturating_sub(1),
            TraceMode::Off => {}
        }
    }

    /// The effective mode right now: `All` wins over `TaintedOnly` if both
    /// happen to be nested active, `Off` if neither is.
    pub fn effective(&self) -> TraceMode {
        if self.all_depth > 0 {
            TraceMode::All
        } else if self.tainted_only_depth > 0 {
            TraceMode::TaintedOnly
        } else {
            TraceMode::Off
        }
    }

    /// `stop-print`: drop every nesting level immediately, regardless of depth.
    pub fn force_off(&mut self) {
        self.all_depth = 0;
        self.tainted_only_depth = 0;
    }

    pub fn should_emit(&self, op_is_tainted: bool) -> bool {
        match self.effective() {
            TraceMode::All => true,
            TraceMode::TaintedOnly => op_is_tainted,
            TraceMode::Off => false,
        }
    }
}

/// Renders a temp reference as `t<id>_<version>` for trace output.
pub fn temp_label(id: TempId, version: u32) -> String {
    format!("t{id}_{version}")
}

//! The JSON shape of a recorded trace: a stand-in for the live stream a real
//! DBI front-end would feed the engine. A trace is a flat, ordered list of
//! syscall/allocation/client-request/lifecycle events for one guest process,
//! optionally carrying a symbol table the offline host uses to answer
//! `--var-name` lookups.

use serde::Deserialize;

use secretgrind_core::ir::{IrExpr, IrStmt, TraceMode};
use secretgrind_core::registry::{AddrClass, ExecutionContext, Frame};
use secretgrind_core::requests::{ClientRequest, SandboxRequest};
use secretgrind_core::syscalls::Whence as HookWhence;

#[derive(Debug, Deserialize)]
pub struct TraceFile {
    pub pid: u32,
    #[serde(default = "default_tid")]
    pub tid: u32,
    #[serde(default)]
    pub symbols: Vec<SymbolEntry>,
    pub events: Vec<Event>,
}

fn default_tid() -> u32 {
    1
}

/// One named region a guest address can resolve to, used by the offline
/// `AddressDescriber` to answer `--var-name`/summary lookups the way a real
/// debug-info layer would.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolEntry {
    pub addr: u64,
    pub size: u64,
    pub name: String,
    #[serde(default)]
    pub class: Option<SymbolClass>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SymbolClass {
    Global,
    Stack,
    Other,
}

impl SymbolClass {
    pub fn as_addr_class(self) -> AddrClass {
        match self {
            SymbolClass::Global => AddrClass::Global,
            SymbolClass::Stack => AddrClass::Stack,
            SymbolClass::Other => AddrClass::Other,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameEntry {
    pub pc: u64,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<FrameEntry> for Frame {
    fn from(f: FrameEntry) -> Self {
        Frame { pc: f.pc, description: f.description }
    }
}

/// Builds an [`ExecutionContext`] from an optional recorded frame list —
/// traces that don't bother capturing stacks just get an empty one.
pub fn context_from(frames: Option<Vec<FrameEntry>>) -> ExecutionContext {
    ExecutionContext {
        frames: frames.unwrap_or_default().into_iter().map(Frame::from).collect(),
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenceArg {
    Set,
    Cur,
    End,
}

impl From<WhenceArg> for HookWhence {
    fn from(w: WhenceArg) -> Self {
        match w {
            WhenceArg::Set => HookWhence::Set,
            WhenceArg::Cur => HookWhence::Cur,
            WhenceArg::End => HookWhence::End,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocKind {
    Malloc,
    Calloc,
    Memalign,
    PosixMemalign,
    New,
    NewArray,
}

impl AllocKind {
    pub fn as_alloc_api(self) -> secretgrind_core::registry::AllocApi {
        use secretgrind_core::registry::AllocApi;
        match self {
            AllocKind::Malloc => AllocApi::Malloc,
            AllocKind::Calloc => AllocApi::Calloc,
            AllocKind::Memalign => AllocApi::Memalign,
            AllocKind::PosixMemalign => AllocApi::PosixMemalign,
            AllocKind::New => AllocApi::New,
            AllocKind::NewArray => AllocApi::NewArray,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceModeArg {
    All,
    TaintedOnly,
}

impl From<TraceModeArg> for TraceMode {
    fn from(m: TraceModeArg) -> Self {
        match m {
            TraceModeArg::All => TraceMode::All,
            TraceModeArg::TaintedOnly => TraceMode::TaintedOnly,
        }
    }
}

/// Tagged on `"action"` rather than `"kind"` — it nests inside
/// [`ClientRequestEvent`] as a newtype variant, and serde's internally
/// tagged enums re-deserialize the *whole* buffered object for a newtype
/// variant's payload, so a shared tag field name would collide with the
/// enclosing enum's own tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SandboxEvent {
    EnterPersistent,
    ExitPersistent,
    EnterEphemeral,
    ExitEphemeral,
    Create { label: String },
    SharedFd { fd: i32 },
    SharedVar { name: String, addr: u64 },
    UpdateSharedVar { name: String, addr: u64 },
    AllowSyscall { nr: u64 },
    EnterCallgate,
    ExitCallgate,
}

impl From<SandboxEvent> for SandboxRequest {
    fn from(e: SandboxEvent) -> Self {
        match e {
            SandboxEvent::EnterPersistent => SandboxRequest::EnterPersistent,
            SandboxEvent::ExitPersistent => SandboxRequest::ExitPersistent,
            SandboxEvent::EnterEphemeral => SandboxRequest::EnterEphemeral,
            SandboxEvent::ExitEphemeral => SandboxRequest::ExitEphemeral,
            SandboxEvent::Create { label } => SandboxRequest::Create { label },
            SandboxEvent::SharedFd { fd } => SandboxRequest::SharedFd { fd },
            SandboxEvent::SharedVar { name, addr } => SandboxRequest::SharedVar { name, addr },
            SandboxEvent::UpdateSharedVar { name, addr } => SandboxRequest::UpdateSharedVar { name, addr },
            SandboxEvent::AllowSyscall { nr } => SandboxRequest::AllowSyscall { nr },
            SandboxEvent::EnterCallgate => SandboxRequest::EnterCallgate,
            SandboxEvent::ExitCallgate => SandboxRequest::ExitCallgate,
        }
    }
}

/// Tagged on `"request"` rather than `"kind"` for the same reason
/// [`SandboxEvent`] is tagged on `"action"`: this enum itself nests inside
/// [`Event::ClientRequest`], which is tagged `"kind"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ClientRequestEvent {
    MakeMemTainted { addr: u64, len: u64 },
    MakeMemUntainted { addr: u64, len: u64 },
    PushTrace { mode: TraceModeArg },
    PopTrace { mode: TraceModeArg },
    StopPrint,
    TaintSummary { label: Option<String> },
    ReadTaintStatus { addr: u64, len: u64 },
    Sandbox(SandboxEvent),
}

impl From<ClientRequestEvent> for ClientRequest {
    fn from(e: ClientRequestEvent) -> Self {
        match e {
            ClientRequestEvent::MakeMemTainted { addr, len } => ClientRequest::MakeMemTainted { addr, len },
            ClientRequestEvent::MakeMemUntainted { addr, len } => ClientRequest::MakeMemUntainted { addr, len },
            ClientRequestEvent::PushTrace { mode } => ClientRequest::PushTrace(mode.into()),
            ClientRequestEvent::PopTrace { mode } => ClientRequest::PopTrace(mode.into()),
            ClientRequestEvent::StopPrint => ClientRequest::StopPrint,
            ClientRequestEvent::TaintSummary { label } => ClientRequest::TaintSummary { label },
            ClientRequestEvent::ReadTaintStatus { addr, len } => ClientRequest::ReadTaintStatus { addr, len },
            ClientRequestEvent::Sandbox(s) => ClientRequest::Sandbox(s.into()),
        }
    }
}

/// One IR expression, as a real DBI front-end's IR lowers onto spec.md
/// §4.4's propagation table. Tagged on `"op"` for the same reason
/// [`SandboxEvent`] is tagged on `"action"` — it nests inside
/// [`IrStmtEvent::WriteTmp`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IrExprEvent {
    Const { value: u64 },
    RdTmp { tmp: u32 },
    Unop { tmp: u32 },
    Binop { a: u32, b: u32 },
    Triop { a: u32, b: u32, c: u32 },
    Qop { a: u32, b: u32, c: u32, d: u32 },
    Ite { cond: u32, t: u32, f: u32 },
    GetReg { reg: u32 },
    Load {
        addr: u32,
        size_bytes: u8,
        #[serde(default)]
        big_endian: bool,
    },
}

impl From<IrExprEvent> for IrExpr {
    fn from(e: IrExprEvent) -> Self {
        match e {
            IrExprEvent::Const { value } => IrExpr::Const(value),
            IrExprEvent::RdTmp { tmp } => IrExpr::RdTmp(tmp),
            IrExprEvent::Unop { tmp } => IrExpr::Unop(tmp),
            IrExprEvent::Binop { a, b } => IrExpr::Binop(a, b),
            IrExprEvent::Triop { a, b, c } => IrExpr::Triop(a, b, c),
            IrExprEvent::Qop { a, b, c, d } => IrExpr::Qop(a, b, c, d),
            IrExprEvent::Ite { cond, t, f } => IrExpr::Ite { cond, t, f },
            IrExprEvent::GetReg { reg } => IrExpr::GetReg(reg),
            IrExprEvent::Load { addr, size_bytes, big_endian } => IrExpr::Load { addr, size_bytes, big_endian },
        }
    }
}

/// One IR statement within a recorded basic block ([`Event::IrBlock`]).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum IrStmtEvent {
    WriteTmp { tmp: u32, expr: IrExprEvent },
    PutReg { reg: u32, value: u32 },
    Store {
        addr: u32,
        value: u32,
        size_bytes: u8,
        #[serde(default)]
        big_endian: bool,
    },
    ExitGuard { guard: u32, target: u64 },
    Imark { addr: u64, len: u8 },
    SimdLoadPrepare { addr: u32, offset: u64 },
    SimdLoadCommit {
        tmp: u32,
        addr: u32,
        offset: u64,
        width_bytes: u8,
        #[serde(default)]
        big_endian: bool,
    },
}

impl From<IrStmtEvent> for IrStmt {
    fn from(s: IrStmtEvent) -> Self {
        match s {
            IrStmtEvent::WriteTmp { tmp, expr } => IrStmt::WriteTmp { tmp, expr: expr.into() },
            IrStmtEvent::PutReg { reg, value } => IrStmt::PutReg { reg, value },
            IrStmtEvent::Store { addr, value, size_bytes, big_endian } => {
                IrStmt::Store { addr, value, size_bytes, big_endian }
            }
            IrStmtEvent::ExitGuard { guard, target } => IrStmt::ExitGuard { guard, target },
            IrStmtEvent::Imark { addr, len } => IrStmt::IMark { addr, len },
            IrStmtEvent::SimdLoadPrepare { addr, offset } => IrStmt::SimdLoadPrepare { addr, offset },
            IrStmtEvent::SimdLoadCommit { tmp, addr, offset, width_bytes, big_endian } => {
                IrStmt::SimdLoadCommit { tmp, addr, offset, width_bytes, big_endian }
            }
        }
    }
}

/// One recorded engine event, in the order the guest produced it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Open {
        fd: i32,
        path: String,
        #[serde(default)]
        file_size: Option<u64>,
    },
    Read {
        fd: i32,
        buf: u64,
        nread: u64,
    },
    Pread {
        fd: i32,
        buf: u64,
        nread: u64,
        offset: u64,
    },
    Lseek {
        fd: i32,
        offset: i64,
        whence: WhenceArg,
    },
    MmapFile {
        fd: i32,
        addr: u64,
        offset: u64,
        len: u64,
        #[serde(default)]
        trace: Option<Vec<FrameEntry>>,
    },
    MmapAnon {
        addr: u64,
        len: u64,
        #[serde(default)]
        trace: Option<Vec<FrameEntry>>,
    },
    Munmap {
        addr: u64,
    },
    Close {
        fd: i32,
    },
    Alloc {
        api: AllocKind,
        addr: u64,
        size: u64,
        #[serde(default)]
        slop: u64,
        #[serde(default)]
        trace: Option<Vec<FrameEntry>>,
    },
    Free {
        addr: u64,
    },
    Realloc {
        old_addr: u64,
        new_addr: u64,
        new_size: u64,
        #[serde(default)]
        trace: Option<Vec<FrameEntry>>,
    },
    /// A propagation-level memory write the host already resolved to "this
    /// range is/isn't tainted" — covers explicit client taint requests and
    /// the common "this computed value derives from tainted input" case.
    TaintMem {
        addr: u64,
        len: u64,
    },
    UntaintMem {
        addr: u64,
        len: u64,
    },
    /// A `memcpy`-shaped propagation: taint follows the copied bytes exactly,
    /// including any partially-tainted ones.
    CopyMem {
        src: u64,
        dst: u64,
        len: u64,
    },
    ClientRequest(ClientRequestEvent),
    /// One basic block's worth of IR, instrumented statement-by-statement
    /// through the real propagation engine (spec.md §4.4) rather than the
    /// `TaintMem`/`CopyMem` shorthand events above.
    IrBlock {
        #[serde(default)]
        fn_name: Option<String>,
        temp_count: u32,
        stmts: Vec<IrStmtEvent>,
    },
    /// The guest's call stack has just unwound below `main`.
    MainEnd,
    /// The guest process is exiting.
    ProcessExit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_trace_file() {
        let raw = r#"{
            "pid": 4242,
            "events": [
                {"kind": "open", "fd": 3, "path": "/tmp/secret", "file_size": 64},
                {"kind": "read", "fd": 3, "buf": 24576, "nread": 16},
                {"kind": "main_end"},
                {"kind": "process_exit"}
            ]
        }"#;
        let trace: TraceFile = serde_json::from_str(raw).unwrap();
        assert_eq!(trace.pid, 4242);
        assert_eq!(trace.tid, 1, "tid should default when omitted");
        assert_eq!(trace.events.len(), 4);
        assert!(matches!(trace.events[0], Event::Open { fd: 3, .. }));
        assert!(matches!(trace.events[2], Event::MainEnd));
        assert!(matches!(trace.events[3], Event::ProcessExit));
    }

    #[test]
    fn client_request_event_nested_in_a_full_trace() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "client_request", "request": "taint_summary", "label": "checkpoint"}
            ]
        }"#;
        let trace: TraceFile = serde_json::from_str(raw).unwrap();
        match &trace.events[0] {
            Event::ClientRequest(ClientRequestEvent::TaintSummary { label }) => {
                assert_eq!(label.as_deref(), Some("checkpoint"));
            }
            other => panic!("expected a TaintSummary client request, got {other:?}"),
        }
    }

    #[test]
    fn ir_block_event_parses_a_load_store_sequence() {
        let raw = r#"{
            "kind": "ir_block",
            "fn_name": "memcpy",
            "temp_count": 3,
            "stmts": [
                {"stmt": "write_tmp", "tmp": 0, "expr": {"op": "const", "value": 4096}},
                {"stmt": "write_tmp", "tmp": 1, "expr": {"op": "load", "addr": 0, "size_bytes": 4}},
                {"stmt": "store", "addr": 0, "value": 1, "size_bytes": 4}
            ]
        }"#;
        let ev: Event = serde_json::from_str(raw).unwrap();
        match ev {
            Event::IrBlock { fn_name, temp_count, stmts } => {
                assert_eq!(fn_name.as_deref(), Some("memcpy"));
                assert_eq!(temp_count, 3);
                assert_eq!(stmts.len(), 3);
                assert!(matches!(IrStmt::from(stmts[2].clone()), IrStmt::Store { addr: 0, value: 1, .. }));
            }
            other => panic!("expected an IrBlock event, got {other:?}"),
        }
    }

    #[test]
    fn sandbox_event_nests_two_levels_deep_without_tag_collision() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "client_request", "request": "sandbox", "action": "enter_persistent"}
            ]
        }"#;
        let trace: TraceFile = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            &trace.events[0],
            Event::ClientRequest(ClientRequestEvent::Sandbox(SandboxEvent::EnterPersistent))
        ));
    }

    #[test]
    fn alloc_event_round_trips_through_as_alloc_api() {
        let raw = r#"{"kind": "alloc", "api": "calloc", "addr": 4096, "size": 128}"#;
        let ev: Event = serde_json::from_str(raw).unwrap();
        match ev {
            Event::Alloc { api, addr, size, slop, trace } => {
                assert_eq!(addr, 4096);
                assert_eq!(size, 128);
                assert_eq!(slop, 0);
                assert!(trace.is_none());
                assert!(matches!(api.as_alloc_api(), secretgrind_core::registry::AllocApi::Calloc));
            }
            other => panic!("expected Alloc, got {other:?}"),
        }
    }

    #[test]
    fn symbol_class_maps_onto_addr_class() {
        assert_eq!(SymbolClass::Stack.as_addr_class(), AddrClass::Stack);
        assert_eq!(SymbolClass::Global.as_addr_class(), AddrClass::Global);
    }
}

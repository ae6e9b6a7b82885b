//! Guest-issued client requests (spec.md §4.7, §6): the in-process ABI a
//! guest program uses to mark memory tainted/untainted, toggle tracing, ask
//! for a mid-run summary, query taint status directly, or interact with the
//! unrelated sandbox-nesting overlay (stored for compatibility with guest
//! programs that issue it, but — per spec.md §4.7 — it never gates core
//! taint behavior here).

use crate::ir::{TraceMode, TraceToggles};
use crate::shadow::{CellState, ShadowMemory};

/// The sandbox-nesting request set (spec.md §4.7/§6). The core stores this
/// state so a guest's enter/exit calls round-trip correctly, but nothing in
/// shadow memory, the registries, or IR propagation reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxRequest {
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    MakeMemTainted { addr: u64, len: u64 },
    MakeMemUntainted { addr: u64, len: u64 },
    /// Enter a client-request-scoped tracing sandbox; nests (spec.md §4.7's
    /// supplemented sandbox semantics), so the matching `Off` restores the
    /// outer sandbox's wish rather than unconditionally disabling tracing.
    PushTrace(TraceMode),
    PopTrace(TraceMode),
    /// `stop-print`: force tracing fully off regardless of nesting depth.
    StopPrint,
    /// Emit a taint summary now, optionally under a caller-chosen label.
    TaintSummary { label: Option<String> },
    /// Is any byte in `[addr, addr+len)` tainted right now?
    ReadTaintStatus { addr: u64, len: u64 },
    /// The sandbox-nesting overlay, stored but inert for taint purposes.
    Sandbox(SandboxRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientResponse {
    Ack,
    TaintStatus(bool),
    /// Carries the label so the engine's summary dispatcher can tag the
    /// output; the actual rendering happens in `crate::summary`.
    SummaryRequested { label: Option<String> },
}

/// Handles everything that doesn't need the allocation registry or
/// provenance (those requests — e.g. "name this block" — are dispatched by
/// the engine directly since they need more context than this module owns).
/// Every request returns a handled acknowledgement, matching spec.md §6's
/// "each request returns a 1-word boolean (handled)".
pub fn dispatch(shadow: &mut ShadowMemory, trace: &mut TraceToggles, req: ClientRequest) -> ClientResponse {
    match req {
        ClientRequest::MakeMemTainted { addr, len } => {
            shadow.set_range(addr, len, CellState::Tainted);
            ClientResponse::Ack
        }
        ClientRequest::MakeMemUntainted { addr, len } => {
            shadow.set_range(addr, len, CellState::Untainted);
            ClientResponse::Ack
        }
        ClientRequest::PushTrace(mode) => {
            trace.push(mode);
            ClientResponse::Ack
        }
        ClientRequest::PopTrace(mode) => {
            trace.pop(mode);
            ClientResponse::Ack
        }
        ClientRequest::StopPrint => {
            trace.force_off();
            ClientResponse::Ack
        }
        ClientRequest::TaintSummary { label } => ClientResponse::SummaryRequested { label },
        ClientRequest::ReadTaintStatus { addr, len } => {
            let any_tainted = (0..len).any(|i| shadow.is_byte_tainted(addr + i));
            ClientResponse::TaintStatus(any_tainted)
        }
        // Sandbox requests are recorded by the caller (the engine keeps a
        // `Vec<SandboxRequest>` log or similar if it wants one) but have no
        // effect here: spec.md §4.7 is explicit that this set "does not gate
        // core taint behavior".
        ClientRequest::Sandbox(_) => ClientResponse::Ack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_tainted_then_read_status_reports_true() {
        let mut shadow = ShadowMemory::default();
        let mut trace = TraceToggles::new();
        dispatch(
            &mut shadow,
            &mut trace,
            ClientRequest::MakeMemTainted { addr: 0x9000, len: 8 },
        );
        let resp = dispatch(
            &mut shadow,
            &mut trace,
            ClientRequest::ReadTaintStatus { addr: 0x9000, len: 8 },
        );
        assert_eq!(resp, ClientResponse::TaintStatus(true));
    }

    #[test]
    fn untainted_range_reads_false() {
        let mut shadow = ShadowMemory::default();
        let mut trace = TraceToggles::new();
        let resp = dispatch(
            &mut shadow,
            &mut trace,
            ClientRequest::ReadTaintStatus { addr: 0xA000, len: 8 },
        );
        assert_eq!(resp, ClientResponse::TaintStatus(false));
    }

    #[test]
    fn push_pop_trace_round_trips_through_toggles() {
        let mut shadow = ShadowMemory::default();
        let mut trace = TraceToggles::new();
        dispatch(&mut shadow, &mut trace, ClientRequest::PushTrace(TraceMode::All));
        assert_eq!(trace.effective(), TraceMode::All);
        dispatch(&mut shadow, &mut trace, ClientRequest::PopTrace(TraceMode::All));
        assert_eq!(trace.effective(), TraceMode::Off);
    }

    #[test]
    fn stop_print_forces_tracing_off_even_when_nested() {
        let mut shadow = ShadowMemory::default();
        let mut trace = TraceToggles::new();
        dispatch(&mut shadow, &mut trace, ClientRequest::PushTrace(TraceMode::All));
        dispatch(&mut shadow, &mut trace, ClientRequest::PushTrace(TraceMode::All));
        dispatch(&mut shadow, &mut trace, ClientRequest::StopPrint);
        assert_eq!(trace.effective(), TraceMode::Off);
    }

    #[test]
    fn taint_summary_request_carries_its_label_through() {
        let mut shadow = ShadowMemory::default();
        let mut trace = TraceToggles::new();
        let resp = dispatch(
            &mut shadow,
            &mut trace,
            ClientRequest::TaintSummary {
                label: Some("checkpoint-1".into()),
            },
        );
        assert_eq!(
            resp,
            ClientResponse::SummaryRequested {
                label: Some("checkpoint-1".into())
            }
        );
    }

    #[test]
    fn sandbox_requests_are_acked_but_inert() {
        let mut shadow = ShadowMemory::default();
        let mut trace = TraceToggles::new();
        let resp = dispatch(
            &mut shadow,
            &mut trace,
            ClientRequest::Sandbox(SandboxRequest::EnterPersistent),
        );
        assert_eq!(resp, ClientResponse::Ack);
        assert_eq!(trace.effective(), TraceMode::Off);
    }
}

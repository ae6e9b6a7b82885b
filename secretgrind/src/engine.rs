//! Drives the engine by replaying one recorded [`TraceFile`] against it —
//! this is the whole of what a real DBI front-end's event loop would do,
//! minus actually instrumenting a live process.

use std::io::Write;

use thiserror::Error;

use secretgrind_core::host::DbiHost;
use secretgrind_core::ir::{BlockContext, RegTaintTable, SimdGate, TempTaintTable};
use secretgrind_core::registry::{AddrClass, AllocationRegistry};
use secretgrind_core::requests::{dispatch, ClientResponse};
use secretgrind_core::shadow::ShadowMemory;
use secretgrind_core::syscalls::{self, FdTable};
use secretgrind_core::{ir::TraceToggles, summary, InvariantViolation, Options};

use crate::offline_host::OfflineHost;
use crate::trace_format::{context_from, Event, TraceFile};

/// Everything replaying a trace can fail with: either ordinary I/O (writing
/// trace/summary output) or an [`InvariantViolation`] bubbled up from the IR
/// propagation or summary layers. The caller (`main`) treats the two very
/// differently — I/O errors are reported and exit 1; an invariant violation
/// is a broken integration and aborts the process (spec.md §7).
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

pub fn replay(trace: TraceFile, opts: Options, out: &mut dyn Write) -> Result<(), ReplayError> {
    let pid = trace.pid;
    let tid = trace.tid;
    let mut host = OfflineHost::new(pid, tid, trace.symbols);
    let mut shadow = ShadowMemory::default();
    let mut registry = AllocationRegistry::new();
    let mut fds = FdTable::new();
    let mut toggles = TraceToggles::new();
    let mut temps = TempTaintTable::new();
    let mut regs = RegTaintTable::new();
    let mut simd = SimdGate::new();
    let mut inst_counter = 0u64;
    let mut current_inst = None;

    if opts.trace_all_on_start {
        toggles.push(secretgrind_core::ir::TraceMode::All);
    }
    if opts.trace_taint_only_on_start || opts.critical_ins_only {
        toggles.push(secretgrind_core::ir::TraceMode::TaintedOnly);
    }
    if opts.taint_stdin {
        fds.open(tid, 0, "<stdin>".to_string(), true, None);
    }

    log::info!("replaying {} events for pid {pid}", trace.events.len());

    for event in trace.events {
        match event {
            Event::Open { fd, path, file_size } => {
                syscalls::on_open(&mut fds, tid, fd, &path, &opts.file_filter, file_size);
            }
            Event::Read { fd, buf, nread } => {
                syscalls::on_read(&mut fds, &mut shadow, &opts, tid, fd, buf, nread);
            }
            Event::Pread { fd, buf, nread, offset } => {
                syscalls::on_pread(&fds, &mut shadow, &opts, tid, fd, buf, nread, offset);
            }
            Event::Lseek { fd, offset, whence } => {
                if syscalls::on_lseek(&mut fds, tid, fd, offset, whence.into()).is_none() {
                    log::warn!("lseek(fd={fd}, whence=END) with no cached file size; ignoring");
                }
            }
            Event::MmapFile { fd, addr, offset, len, trace } => {
                syscalls::on_mmap_file(
                    &mut registry,
                    &mut shadow,
                    &fds,
                    &opts,
                    tid,
                    fd,
                    addr,
                    offset,
                    len,
                    context_from(trace),
                );
            }
            Event::MmapAnon { addr, len, trace } => {
                syscalls::on_mmap_anon(&mut registry, addr, len, context_from(trace));
            }
            Event::Munmap { addr } => {
                syscalls::on_munmap(&mut registry, &mut shadow, addr, opts.warn_on_release, opts.remove_on_release);
            }
            Event::Close { fd } => {
                syscalls::on_close(&mut fds, tid, fd);
            }
            Event::Alloc { api, addr, size, slop, trace } => {
                registry.record_alloc(
                    addr,
                    size,
                    slop,
                    AddrClass::HeapMalloc,
                    api.as_alloc_api(),
                    context_from(trace),
                    current_inst.clone(),
                );
            }
            Event::Free { addr } => {
                if let Some(outcome) = registry.free(addr, &mut shadow, opts.warn_on_release, opts.remove_on_release) {
                    if let Some((off, len)) = outcome.warn_tainted_range {
                        log::warn!("block at 0x{addr:x} freed with tainted bytes [0x{off:x}, 0x{:x})", off + len);
                    }
                }
            }
            Event::Realloc { old_addr, new_addr, new_size, trace } => {
                registry.realloc(
                    old_addr,
                    new_addr,
                    new_size,
                    0,
                    &mut shadow,
                    opts.warn_on_release,
                    opts.remove_on_release,
                    context_from(trace),
                    current_inst.clone(),
                );
            }
            Event::TaintMem { addr, len } => {
                shadow.set_range(addr, len, secretgrind_core::shadow::CellState::Tainted);
            }
            Event::UntaintMem { addr, len } => {
                shadow.set_range(addr, len, secretgrind_core::shadow::CellState::Untainted);
            }
            Event::CopyMem { src, dst, len } => {
                shadow.copy_range(src, dst, len);
            }
            Event::ClientRequest(req) => {
                let resp = dispatch(&mut shadow, &mut toggles, req.into());
                if let ClientResponse::SummaryRequested { label } = resp {
                    emit_summary(&mut shadow, &registry, &host, &opts, label, out)?;
                }
            }
            Event::IrBlock { fn_name, temp_count, stmts } => {
                temps.start_block(temp_count as usize);
                let fn_name = fn_name.unwrap_or_default();
                let mut ctx = BlockContext {
                    temps: &mut temps,
                    regs: &mut regs,
                    shadow: &mut shadow,
                    simd: &mut simd,
                    trace: &toggles,
                    pid,
                    fn_name: &fn_name,
                    taint_data_flow_only: opts.taint_data_flow_only,
                    inst_counter: &mut inst_counter,
                    current_inst: &mut current_inst,
                };
                for stmt in stmts {
                    if let Some(ev) = secretgrind_core::ir::apply(&mut ctx, &stmt.into())? {
                        writeln!(out, "{ev}")?;
                    }
                }
            }
            Event::MainEnd => {
                host.mark_below_main();
                if opts.fires_on_main_end() {
                    emit_summary(&mut shadow, &registry, &host, &opts, Some("end of main".to_string()), out)?;
                }
            }
            Event::ProcessExit => {
                if opts.fires_on_exit() {
                    emit_summary(&mut shadow, &registry, &host, &opts, Some("process exit".to_string()), out)?;
                }
            }
        }
    }

    Ok(())
}

fn emit_summary(
    shadow: &mut ShadowMemory,
    registry: &AllocationRegistry,
    host: &OfflineHost,
    opts: &Options,
    label: Option<String>,
    out: &mut dyn Write,
) -> Result<(), ReplayError> {
    let report = summary::build_report(shadow, registry, host, label)?;
    let rendered = summary::render(&report, registry, host, opts, host.pid(), host.tid());
    out.write_all(rendered.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay_json(raw: &str, opts: Options) -> String {
        let trace: TraceFile = serde_json::from_str(raw).unwrap();
        let mut out = Vec::new();
        replay(trace, opts, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    /// spec.md §4.4's SIMD prepare/commit protocol: a commit with no matching
    /// prepare is an invariant violation, not a recoverable trace oddity —
    /// `replay` surfaces it as `ReplayError::Invariant` rather than a panic.
    #[test]
    fn simd_commit_with_no_prepare_surfaces_as_a_replay_error() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "ir_block", "temp_count": 2, "stmts": [
                    {"stmt": "simd_load_commit", "tmp": 0, "addr": 1, "offset": 0, "width_bytes": 16, "big_endian": false}
                ]},
                {"kind": "process_exit"}
            ]
        }"#;
        let trace: TraceFile = serde_json::from_str(raw).unwrap();
        let mut out = Vec::new();
        let err = replay(trace, Options::default(), &mut out).unwrap_err();
        assert!(matches!(err, ReplayError::Invariant(InvariantViolation::SimdProtocolMismatch)));
    }

    /// spec.md §8 scenario 1: a file opened under `--file-filter` taints only
    /// the configured `[file-taint-start, file-taint-start+file-taint-len)`
    /// window of what gets read from it.
    #[test]
    fn file_read_taint_window_shows_up_in_the_exit_summary() {
        let raw = r#"{
            "pid": 77,
            "events": [
                {"kind": "open", "fd": 3, "path": "/tmp/secret", "file_size": 32},
                {"kind": "read", "fd": 3, "buf": 24576, "nread": 16},
                {"kind": "process_exit"}
            ]
        }"#;
        let mut opts = Options::default();
        opts.file_filter = secretgrind_core::filter::FileFilter::parse("/tmp/secret", None);
        opts.file_taint_start = 4;
        opts.file_taint_len = 8;

        let rendered = replay_json(raw, opts);
        assert!(rendered.contains("Total bytes tainted: 8"), "{rendered}");
        assert!(rendered.contains("0x6004 - 0x600b"), "{rendered}");
    }

    /// A `memcpy`-shaped propagation: taint follows the copied bytes exactly.
    #[test]
    fn copy_mem_propagates_taint_to_the_destination() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "taint_mem", "addr": 4096, "len": 4},
                {"kind": "copy_mem", "src": 4096, "dst": 8192, "len": 4},
                {"kind": "untaint_mem", "addr": 4096, "len": 4},
                {"kind": "process_exit"}
            ]
        }"#;
        let rendered = replay_json(raw, Options::default());
        assert!(rendered.contains("Total bytes tainted: 4"), "{rendered}");
        assert!(rendered.contains("0x2000 - 0x2003"), "{rendered}");
    }

    /// spec.md §8 scenario: freeing a block that still holds tainted bytes
    /// emits a warning and, with `remove-on-release=yes` (the default),
    /// clears the taint — so the exit summary reports nothing left tainted.
    #[test]
    fn free_with_tainted_bytes_clears_taint_and_logs_a_warning() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "alloc", "api": "malloc", "addr": 4096, "size": 64},
                {"kind": "taint_mem", "addr": 4096, "len": 8},
                {"kind": "free", "addr": 4096},
                {"kind": "process_exit"}
            ]
        }"#;
        let rendered = replay_json(raw, Options::default());
        assert!(rendered.contains("No bytes tainted"), "{rendered}");
    }

    /// spec.md §8 scenario 4: mmap'ing a tainted file rounds the taint
    /// window up to a whole page and reports it under the `mmap_file` class.
    #[test]
    fn mmap_file_taints_the_page_rounded_range() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "open", "fd": 3, "path": "/tmp/f", "file_size": 8192},
                {"kind": "mmap_file", "fd": 3, "addr": 2415919104, "offset": 0, "len": 8192},
                {"kind": "process_exit"}
            ]
        }"#;
        let mut opts = Options::default();
        opts.file_filter = secretgrind_core::filter::FileFilter::parse("*", None);
        let rendered = replay_json(raw, opts);
        assert!(rendered.contains("(mmap_file) range"), "{rendered}");
        assert!(rendered.contains("Total bytes tainted: 8192"), "{rendered}");
    }

    /// A client-requested summary mid-run reports the running taint state
    /// under the caller-chosen label, independent of `--summary-exit-only`.
    #[test]
    fn explicit_taint_summary_request_uses_its_label() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "taint_mem", "addr": 4096, "len": 2},
                {"kind": "client_request", "request": "taint_summary", "label": "checkpoint"}
            ]
        }"#;
        let mut opts = Options::default();
        opts.summary_exit_only = true;
        let rendered = replay_json(raw, opts);
        assert!(rendered.contains("[TAINT SUMMARY] - checkpoint:"), "{rendered}");
        assert!(rendered.contains("Total bytes tainted: 2"), "{rendered}");
    }

    /// spec.md §8 scenario 2: `TNT_MAKE_MEM_TAINTED(p, 32)` then a real
    /// `memcpy`-shaped IR block (one load per byte, one store per byte)
    /// driven through the actual propagation engine — not the `copy_mem`
    /// shorthand — ends with every destination byte tainted.
    #[test]
    fn ir_block_load_store_loop_propagates_taint_like_a_real_memcpy() {
        let mut stmts = Vec::new();
        for i in 0..4u32 {
            stmts.push(serde_json::json!({
                "stmt": "write_tmp", "tmp": i * 3,
                "expr": {"op": "const", "value": 0x1000 + i as u64}
            }));
            stmts.push(serde_json::json!({
                "stmt": "write_tmp", "tmp": i * 3 + 1,
                "expr": {"op": "load", "addr": i * 3, "size_bytes": 1}
            }));
            stmts.push(serde_json::json!({
                "stmt": "write_tmp", "tmp": i * 3 + 2,
                "expr": {"op": "const", "value": 0x2000 + i as u64}
            }));
            stmts.push(serde_json::json!({
                "stmt": "store", "addr": i * 3 + 2, "value": i * 3 + 1, "size_bytes": 1
            }));
        }
        let raw = serde_json::json!({
            "pid": 1,
            "events": [
                {"kind": "taint_mem", "addr": 4096, "len": 4},
                {"kind": "ir_block", "fn_name": "memcpy", "temp_count": 12, "stmts": stmts},
                {"kind": "untaint_mem", "addr": 4096, "len": 4},
                {"kind": "process_exit"}
            ]
        })
        .to_string();
        let rendered = replay_json(&raw, Options::default());
        assert!(rendered.contains("Total bytes tainted: 4"), "{rendered}");
        assert!(rendered.contains("0x2000 - 0x2003"), "{rendered}");
    }

    /// spec.md §8 scenario 6: `x = arr[tainted_index]` over an untainted
    /// `arr` — the index value itself is tainted (loaded from a tainted
    /// word), folded into the effective address via a `binop`, and `arr`'s
    /// backing bytes are never tainted. With `taint-df-only=no` (default)
    /// the tainted *address* still taints the loaded value `x`; with
    /// `taint-df-only=yes` only the untainted `arr` contents matter and `x`
    /// comes out untainted.
    #[test]
    fn tainted_index_load_honors_taint_data_flow_only() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "taint_mem", "addr": 5000, "len": 1},
                {"kind": "ir_block", "temp_count": 7, "stmts": [
                    {"stmt": "write_tmp", "tmp": 0, "expr": {"op": "const", "value": 4096}},
                    {"stmt": "write_tmp", "tmp": 1, "expr": {"op": "const", "value": 5000}},
                    {"stmt": "write_tmp", "tmp": 2, "expr": {"op": "load", "addr": 1, "size_bytes": 1}},
                    {"stmt": "write_tmp", "tmp": 3, "expr": {"op": "binop", "a": 0, "b": 2}},
                    {"stmt": "write_tmp", "tmp": 4, "expr": {"op": "load", "addr": 3, "size_bytes": 1}},
                    {"stmt": "write_tmp", "tmp": 5, "expr": {"op": "const", "value": 7000}},
                    {"stmt": "store", "addr": 5, "value": 4, "size_bytes": 1}
                ]},
                {"kind": "process_exit"}
            ]
        }"#;
        let rendered_default = replay_json(raw, Options::default());
        assert!(rendered_default.contains("Total bytes tainted: 1"), "{rendered_default}");
        assert!(rendered_default.contains("0x1b58"), "{rendered_default}");

        let mut df_only = Options::default();
        df_only.taint_data_flow_only = true;
        let rendered_df_only = replay_json(raw, df_only);
        assert!(rendered_df_only.contains("No bytes tainted"), "{rendered_df_only}");
    }

    /// spec.md §4.4's `imark` assigns a monotonic instruction ID; a `realloc`
    /// that happens shortly after one picks it up as real taint provenance
    /// instead of the empty placeholder the registry used to fall back on.
    #[test]
    fn imark_provenance_shows_up_in_a_reallocated_chunks_taint_trace() {
        let raw = r#"{
            "pid": 1,
            "events": [
                {"kind": "alloc", "api": "malloc", "addr": 4096, "size": 64},
                {"kind": "taint_mem", "addr": 4096, "len": 16},
                {"kind": "ir_block", "temp_count": 1, "stmts": [
                    {"stmt": "imark", "addr": 4198400, "len": 5}
                ]},
                {"kind": "realloc", "old_addr": 4096, "new_addr": 20480, "new_size": 128},
                {"kind": "process_exit"}
            ]
        }"#;
        let rendered = replay_json(raw, Options::default());
        assert!(rendered.contains("tainted at:"), "{rendered}");
        assert!(rendered.contains("0x401000"), "{rendered}");
    }

    /// Tainted bytes spanning a heap chunk and an unregistered (global)
    /// address resolve to two distinct spans in the same summary, each
    /// under its own address class.
    #[test]
    fn summary_aggregates_across_heap_and_global_spans() {
        let raw = r#"{
            "pid": 1,
            "symbols": [{"addr": 90000, "size": 8, "name": "api_key", "class": "global"}],
            "events": [
                {"kind": "alloc", "api": "malloc", "addr": 4096, "size": 16},
                {"kind": "taint_mem", "addr": 4096, "len": 4},
                {"kind": "taint_mem", "addr": 90000, "len": 8},
                {"kind": "process_exit"}
            ]
        }"#;
        let rendered = replay_json(raw, Options::default());
        assert!(rendered.contains("(malloc)"), "{rendered}");
        assert!(rendered.contains("(global)"), "{rendered}");
        assert!(rendered.contains("> api_key"), "{rendered}");
        assert!(rendered.contains("Total bytes tainted: 12"), "{rendered}");
    }
}

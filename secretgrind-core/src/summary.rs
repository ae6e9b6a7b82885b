//! The taint-summary report (spec.md §4.6): walks shadow memory for tainted
//! byte runs, splits each run at address-class boundaries, and correlates
//! every emitted span with whatever chunks the provenance registry has
//! overlapping it. Triggers (end of `main`, process exit, an explicit
//! `TaintSummary` client request) are the caller's job — this module only
//! builds and renders the report once asked.

use std::fmt::Write as _;

use crate::config::Options;
use crate::error::InvariantViolation;
use crate::host::{AddressDescriber, AddressDescription};
use crate::registry::{AddrClass, AllocationRegistry, Chunk, ChunkId};
use crate::shadow::ShadowMemory;

/// One coalesced span of tainted bytes, all resolving to the same address
/// class. Spans also never cross a secondary-map boundary — that break is
/// already applied by [`ShadowMemory::tainted_runs`] before class-splitting
/// runs on top of it.
#[derive(Debug, Clone)]
pub struct TaintedSpan {
    pub start: u64,
    pub end: u64,
    pub class: AddrClass,
    pub chunks: Vec<ChunkId>,
}

impl TaintedSpan {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
pub struct SummaryReport {
    pub label: Option<String>,
    pub spans: Vec<TaintedSpan>,
    pub total_bytes: u64,
}

/// Builds a report by scanning `shadow` for tainted runs and classifying
/// each byte against `registry`'s six provenance lists, falling back to
/// `classifier` (the host's address-description API) for bytes the
/// allocation registry doesn't own — globals and stack locations, chiefly.
///
/// Returns `Err` (and abandons the in-progress report) if the provenance
/// registry finds a tainted range straddling a registered block boundary —
/// an invariant violation, not a condition the summary engine can explain.
pub fn build_report(
    shadow: &mut ShadowMemory,
    registry: &AllocationRegistry,
    classifier: &dyn AddressDescriber,
    label: Option<String>,
) -> Result<SummaryReport, InvariantViolation> {
    let mut spans = Vec::new();
    let mut total_bytes = 0u64;

    for (lo, hi) in shadow.tainted_runs() {
        for (start, end, class) in split_by_class(registry, classifier, lo, hi)? {
            let chunks = registry.provenance.overlapping(&registry.arena, class, start, end);
            total_bytes += end - start;
            spans.push(TaintedSpan { start, end, class, chunks });
        }
    }

    Ok(SummaryReport { label, spans, total_bytes })
}

fn classify_addr(
    registry: &AllocationRegistry,
    classifier: &dyn AddressDescriber,
    addr: u64,
) -> Result<AddrClass, InvariantViolation> {
    if registry.is_heap_address(addr) {
        return Ok(AddrClass::HeapMalloc);
    }
    for &class in AddrClass::ALL.iter() {
        if class == AddrClass::HeapMalloc {
            continue;
        }
        if registry.provenance.get_parent_block(&registry.arena, class, addr, 1)?.is_some() {
            return Ok(class);
        }
    }
    Ok(match classifier.describe(addr) {
        AddressDescription::Stack => AddrClass::Stack,
        AddressDescription::DataSym { .. } | AddressDescription::Variable { .. } => AddrClass::Global,
        AddressDescription::CodeBlock { .. } => AddrClass::Other,
        AddressDescription::Unknown { class } => class,
    })
}

/// Breaks `[lo, hi)` into maximal sub-runs sharing one address class
/// (spec.md §4.6's second coalescing rule).
fn split_by_class(
    registry: &AllocationRegistry,
    classifier: &dyn AddressDescriber,
    lo: u64,
    hi: u64,
) -> Result<Vec<(u64, u64, AddrClass)>, InvariantViolation> {
    let mut out = Vec::new();
    let mut span_start = lo;
    let mut span_class = classify_addr(registry, classifier, lo)?;
    for addr in (lo + 1)..hi {
        let class = classify_addr(registry, classifier, addr)?;
        if class != span_class {
            out.push((span_start, addr, span_class));
            span_start = addr;
            span_class = class;
        }
    }
    out.push((span_start, hi, span_class));
    Ok(out)
}

/// Resolves the name shown for one chunk, in the tier order spec.md §4.6/§7
/// document: an explicit client-named (`vname`) block first, then — if
/// `--var-name` is on — whatever the host's debug-info layer reports, then a
/// verbose alloc-site description (`--summary-verbose`), then an anonymous
/// `@0xADDR_class_pid_tid` fallback.
fn chunk_display_name(
    chunk: &Chunk,
    classifier: &dyn AddressDescriber,
    opts: &Options,
    pid: u32,
    tid: u32,
) -> String {
    if let Some(name) = &chunk.vname {
        return name.clone();
    }
    if opts.var_name {
        if let AddressDescription::Variable { name, .. } = classifier.describe(chunk.data) {
            return name;
        }
    }
    if let Some(name) = chunk.detailed_name(opts.summary_verbose) {
        return name;
    }
    format!("@0x{:x}_{}_{}_{}", chunk.data, chunk.addr_class.tag(), pid, tid)
}

/// Renders a built report as the ASCII text the original tool prints to
/// stdout (spec.md §6). `pid`/`tid` are only used to synthesize anonymous
/// chunk names for tainted bytes with no owning chunk (spec.md §7).
pub fn render(
    report: &SummaryReport,
    registry: &AllocationRegistry,
    classifier: &dyn AddressDescriber,
    opts: &Options,
    pid: u32,
    tid: u32,
) -> String {
    let mut out = String::new();
    let label = report.label.as_deref().unwrap_or("summary");
    let _ = writeln!(out, "=={pid}== [TAINT SUMMARY] - {label}:");

    if !opts.summary_total_only {
        for (i, span) in report.spans.iter().enumerate() {
            let _ = writeln!(
                out,
                "*** ({}) ({}) range [0x{:x} - 0x{:x}] ({} bytes) is tainted",
                i + 1,
                span.class,
                span.start,
                span.end - 1,
                span.len(),
            );
            if span.chunks.is_empty() {
                let _ = writeln!(out, "   > {}", unchunked_name(span, classifier, opts, pid, tid));
                continue;
            }
            for &id in &span.chunks {
                let Some(chunk) = registry.arena.get(id) else { continue };
                render_chunk(&mut out, chunk, classifier, opts, pid, tid);
            }
        }
    }

    if report.total_bytes == 0 {
        let _ = writeln!(out, "No bytes tainted");
    } else {
        let _ = writeln!(out, "Total bytes tainted: {}", report.total_bytes);
    }
    out
}

/// Names a span with no owning chunk — a global or stack address the
/// allocation registry never tracked. `--var-name` still gets a chance to
/// resolve it through the host's debug-info layer before falling back to
/// the anonymous `@0xADDR_class_pid_tid` form (spec.md §7).
fn unchunked_name(span: &TaintedSpan, classifier: &dyn AddressDescriber, opts: &Options, pid: u32, tid: u32) -> String {
    if opts.var_name {
        match classifier.describe(span.start) {
            AddressDescription::Variable { name, .. } | AddressDescription::DataSym { name } => return name,
            _ => {}
        }
    }
    format!("@0x{:x}_{}_{}_{}", span.start, span.class.tag(), pid, tid)
}

fn render_chunk(out: &mut String, chunk: &Chunk, classifier: &dyn AddressDescriber, opts: &Options, pid: u32, tid: u32) {
    let name = chunk_display_name(chunk, classifier, opts, pid, tid);
    let _ = writeln!(out, "   > {name}");
    if let Some(taint_trace) = &chunk.taint_trace {
        let _ = writeln!(out, "   tainted at:");
        let _ = write!(out, "{taint_trace}");
    }
    let _ = writeln!(out, "   allocated at:");
    let _ = write!(out, "{}", chunk.alloc_trace);
    match &chunk.release_trace {
        Some(release_trace) => {
            let _ = writeln!(out, "   released at:");
            let _ = write!(out, "{release_trace}");
        }
        None if !chunk.master || matches!(chunk.addr_class, AddrClass::HeapMalloc | AddrClass::MmapFile | AddrClass::MmapAnon) => {
            let _ = writeln!(out, "   warning: this block was never released");
        }
        None => {}
    }
}

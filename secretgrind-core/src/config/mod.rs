//! Host-agnostic run configuration (spec.md §4.7) and the small parsing
//! helpers the CLI layer uses to build it. Every option spec.md §4.7
//! enumerates lives on [`Options`]; the binary crate's `clap` parser is just
//! a different way of constructing the same struct.

use crate::filter::FileFilter;

/// Everything that changes engine behavior, independent of any particular
/// host binary's flag names.
#[derive(Debug, Clone)]
pub struct Options {
    // --- file filter / file taint window (spec.md §4.7, §4.8) ---
    pub file_filter: FileFilter,
    /// Byte offset within a matched file at which the taint window starts.
    pub file_taint_start: u64,
    /// Length of the taint window; `u64::MAX` means "to end of file".
    pub file_taint_len: u64,
    /// Page size used to round an `mmap`'d file region (must be a power of two).
    pub file_mmap_pagesize: u64,
    /// Pre-taint `stdin` at startup, honoring the same taint window.
    pub taint_stdin: bool,

    // --- taint propagation behavior (spec.md §4.4) ---
    /// When true, loading from a tainted address does not itself taint the
    /// loaded value — only data already marked tainted propagates
    /// ("taint-data-flow only" mode).
    pub taint_data_flow_only: bool,
    /// Print a warning when a block containing tainted bytes is freed/munmap'd.
    pub warn_on_release: bool,
    /// Clear taint on a block's bytes when it's freed (otherwise a
    /// use-after-free read would still report tainted).
    pub remove_on_release: bool,
    /// Show the originating instruction/allocation site alongside a taint event.
    pub show_source: bool,

    // --- tracing (spec.md §4.4, §4.7) ---
    /// Start with tracing on (nesting depth 1) rather than off.
    pub trace_all_on_start: bool,
    /// Start in tainted-only trace mode rather than off.
    pub trace_taint_only_on_start: bool,
    /// The original tool's `--critical-ins-only` toggle: wired all the way
    /// through option parsing but its intended classification of "critical"
    /// instructions is not clearly defined in the source this was distilled
    /// from (spec.md §9 Open questions says not to guess at it). Kept as a
    /// stored, documented toggle that currently behaves identically to
    /// `trace-taint-only` — set it on at startup and it pushes the same
    /// `TraceMode::TaintedOnly` nesting level would.
    pub critical_ins_only: bool,

    // --- naming / symbolization (spec.md §4.7) ---
    /// Resolve variable names via the host's debug-info layer for summary output.
    pub var_name: bool,
    /// Render instruction mnemonics (via the host's disassembler) in trace/summary output.
    pub mnemonics: bool,
    /// Verbose internal diagnostics (side-table GC activity, SM stats), routed through `log`.
    pub debug: bool,

    // --- summary (spec.md §4.6, §4.7) ---
    pub summary: bool,
    /// Use verbose alloc-site names (`malloc(64)@0xADDR`) in the summary
    /// instead of just an anonymous fallback.
    pub summary_verbose: bool,
    /// Only trigger the summary at process exit, not at end of `main`.
    pub summary_exit_only: bool,
    /// Only trigger the summary at end of `main`, not at process exit.
    pub summary_main_only: bool,
    /// Suppress the per-range listing; print only the running byte total.
    pub summary_total_only: bool,
    /// Instruction IDs (assigned at `imark` time) for which a full stack
    /// trace should always be force-captured, even if that's more expensive
    /// than the default capture policy.
    pub summary_fix_inst: Vec<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            file_filter: FileFilter::default(),
            file_taint_start: 0,
            file_taint_len: u64::MAX,
            file_mmap_pagesize: 0x1000,
            taint_stdin: false,
            taint_data_flow_only: false,
            warn_on_release: true,
            remove_on_release: true,
            show_source: true,
            trace_all_on_start: false,
            trace_taint_only_on_start: false,
            critical_ins_only: false,
            var_name: true,
            mnemonics: false,
            debug: false,
            summary: true,
            summary_verbose: false,
            summary_exit_only: false,
            summary_main_only: false,
            summary_total_only: false,
            summary_fix_inst: Vec::new(),
        }
    }
}

impl Options {
    /// Validates the combination the way the original rejects a bad config
    /// before instrumentation starts (spec.md §7, *Configuration error*):
    /// a non-power-of-two page size, or both summary triggers disabled while
    /// tracking is still asked to run at a specific one.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        if self.file_mmap_pagesize == 0 || !self.file_mmap_pagesize.is_power_of_two() {
            return Err(crate::error::ConfigError::InvalidFileFilter(
                format!("--file-mmap-use-pagesize={}", self.file_mmap_pagesize),
                "page size must be a nonzero power of two",
            ));
        }
        if self.summary_exit_only && self.summary_main_only {
            return Err(crate::error::ConfigError::InvalidFileFilter(
                "--summary-exit-only and --summary-main-only".to_string(),
                "these triggers are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Does this trigger apply given `--summary-exit-only`/`--summary-main-only`?
    pub fn fires_on_main_end(&self) -> bool {
        self.summary && !self.summary_exit_only
    }

    pub fn fires_on_exit(&self) -> bool {
        self.summary && !self.summary_main_only
    }
}

/// Parses a CLI-style comma-separated file filter list (`--file-filter`),
/// expanding a leading `~/` against `home`.
pub fn parse_file_filter_list(raw: &str, home: Option<&str>) -> FileFilter {
    FileFilter::parse(raw, home)
}

/// Parses `"yes"`/`"no"` (case-insensitive), the original tool's boolean
/// flag format, rather than clap's native `bool` parsing — kept so
/// offline-trace JSON configs produced by the original tooling still parse.
pub fn parse_bool_yes_no(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Splits `name=value` at the first `=`, the way the teacher's
/// `cli_utils::split_at_first_equals` does for `KEY=VALUE` command
/// environment entries — used here for `--tnt-arg key=value` style
/// passthrough options.
pub fn split_at_first_equals(s: &str) -> Option<(&str, &str)> {
    let pos = s.find('=')?;
    Some((&s[..pos], &s[pos + 1..]))
}

/// Parses a comma-separated list of instruction IDs (`--summary-fix-inst`),
/// the original tool's numeric-list flag format.
pub fn parse_inst_id_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| crate::libc_compat::strtol(s, 0).0.try_into().ok())
        .collect()
}

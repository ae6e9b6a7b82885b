//! Command-line surface: `secretgrind analyze <trace.json>`. Every flag here
//! is a thin wrapper around one field of [`secretgrind_core::config::Options`]
//! — the CLI's only job is parsing argv into that struct the same way a real
//! DBI front-end's command-line argument parser would.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use secretgrind_core::config::{parse_bool_yes_no, parse_file_filter_list};
use secretgrind_core::libc_compat::strtol;
use secretgrind_core::Options;

#[derive(Debug, Parser)]
#[command(
    name = "secretgrind",
    version,
    about = r#"
secretgrind is a dynamic taint-tracking engine for finding where sensitive
bytes (file contents, stdin, explicitly marked buffers) end up flowing.

EXAMPLES:
    # Replay a recorded instrumentation trace and print its taint summary:
    secretgrind analyze trace.json

    # Only taint bytes 4..12 of anything matching /tmp/secret:
    secretgrind analyze --file-filter=/tmp/secret --file-taint-start=4 --file-taint-len=8 trace.json
"#
)]
pub struct Opt {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Replay a recorded trace file and report where tainted bytes ended up.
    Analyze(AnalyzeArgs),
}

fn parse_yes_no(raw: &str) -> Result<bool, String> {
    parse_bool_yes_no(raw).ok_or_else(|| format!("expected \"yes\" or \"no\", got {raw:?}"))
}

fn parse_inst_id(raw: &str) -> Result<u64, String> {
    let (value, consumed) = strtol(raw, 0);
    if consumed == 0 {
        return Err(format!("not a valid instruction id: {raw:?}"));
    }
    u64::try_from(value).map_err(|_| format!("instruction id out of range: {raw:?}"))
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Path to the recorded trace file to replay (JSON).
    pub trace: PathBuf,

    /// Comma-separated list of file paths that are taint sources, or `*` for
    /// every opened file. Empty means no file ever taints.
    #[arg(long, default_value = "")]
    pub file_filter: String,

    /// Byte offset within a matched file at which the taint window starts.
    #[arg(long, default_value = "0")]
    pub file_taint_start: u64,

    /// Length of the taint window; defaults to "rest of file".
    #[arg(long)]
    pub file_taint_len: Option<u64>,

    /// Page size used when rounding an mmap'd file region (must be a power of two).
    #[arg(long, default_value = "4096")]
    pub file_mmap_use_pagesize: u64,

    /// Pre-taint stdin at startup, honoring the same taint window.
    #[arg(long, value_parser = parse_yes_no, default_value = "no")]
    pub taint_stdin: bool,

    /// Loading from a tainted address does not itself taint the loaded value.
    #[arg(long = "taint-data-flow-only", value_parser = parse_yes_no, default_value = "no")]
    pub taint_data_flow_only: bool,

    /// Print a warning when a block containing tainted bytes is released.
    #[arg(long, value_parser = parse_yes_no, default_value = "yes")]
    pub warn_on_release: bool,

    /// Clear taint on a block's bytes when it's released.
    #[arg(long, value_parser = parse_yes_no, default_value = "yes")]
    pub remove_on_release: bool,

    /// Show the originating instruction/allocation site alongside a taint event.
    #[arg(long, value_parser = parse_yes_no, default_value = "yes")]
    pub show_source: bool,

    /// Start with full tracing on rather than off.
    #[arg(long)]
    pub trace_all_on_start: bool,

    /// Start in tainted-only trace mode rather than off.
    #[arg(long)]
    pub trace_taint_only_on_start: bool,

    /// The original tool's `--critical-ins-only`; currently behaves
    /// identically to `--trace-taint-only-on-start` (see the doc comment on
    /// `Options::critical_ins_only`).
    #[arg(long)]
    pub critical_ins_only: bool,

    /// Resolve variable names for summary output, when the trace supplies them.
    #[arg(long, value_parser = parse_yes_no, default_value = "yes")]
    pub var_name: bool,

    /// Render instruction mnemonics in trace output, when the trace supplies them.
    #[arg(long, value_parser = parse_yes_no, default_value = "no")]
    pub mnemonics: bool,

    /// Verbose internal diagnostics (side-table GC activity, SM stats).
    #[arg(long)]
    pub debug: bool,

    /// Emit a taint summary.
    #[arg(long, value_parser = parse_yes_no, default_value = "yes")]
    pub summary: bool,

    /// Use verbose alloc-site names in the summary instead of an anonymous fallback.
    #[arg(long)]
    pub summary_verbose: bool,

    /// Only trigger the summary at process exit, not at end of main.
    #[arg(long, conflicts_with = "summary_main_only")]
    pub summary_exit_only: bool,

    /// Only trigger the summary at end of main, not at process exit.
    #[arg(long)]
    pub summary_main_only: bool,

    /// Suppress the per-range listing; print only the running byte total.
    #[arg(long)]
    pub summary_total_only: bool,

    /// Instruction ids for which a stack trace should always be force-captured.
    #[arg(long, value_delimiter = ',', value_parser = parse_inst_id)]
    pub summary_fix_inst: Vec<u64>,
}

impl AnalyzeArgs {
    pub fn to_options(&self) -> Options {
        let home = std::env::var("HOME").ok();
        Options {
            file_filter: parse_file_filter_list(&self.file_filter, home.as_deref()),
            file_taint_start: self.file_taint_start,
            file_taint_len: self.file_taint_len.unwrap_or(u64::MAX),
            file_mmap_pagesize: self.file_mmap_use_pagesize,
            taint_stdin: self.taint_stdin,
            taint_data_flow_only: self.taint_data_flow_only,
            warn_on_release: self.warn_on_release,
            remove_on_release: self.remove_on_release,
            show_source: self.show_source,
            trace_all_on_start: self.trace_all_on_start,
            trace_taint_only_on_start: self.trace_taint_only_on_start,
            critical_ins_only: self.critical_ins_only,
            var_name: self.var_name,
            mnemonics: self.mnemonics,
            debug: self.debug,
            summary: self.summary,
            summary_verbose: self.summary_verbose,
            summary_exit_only: self.summary_exit_only,
            summary_main_only: self.summary_main_only,
            summary_total_only: self.summary_total_only,
            summary_fix_inst: self.summary_fix_inst.clone(),
        }
    }
}

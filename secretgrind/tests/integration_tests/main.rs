//! End-to-end scenarios (spec.md §8) driven entirely through secretgrind's
//! public surface: parse a CLI invocation into `Options`, replay a recorded
//! trace against the engine, and check the rendered report.

use std::io::Write as _;

use clap::Parser;

use secretgrind::cli::{Action, Opt};
use secretgrind::engine;
use secretgrind::trace_format::TraceFile;

fn analyze_args<'a>(argv: impl IntoIterator<Item = &'a str>) -> secretgrind::cli::AnalyzeArgs {
    let opt = Opt::parse_from(argv);
    let Action::Analyze(args) = opt.action;
    args
}

fn replay(trace_json: &str, opts: secretgrind_core::Options) -> String {
    let trace: TraceFile = serde_json::from_str(trace_json).unwrap();
    let mut out = Vec::new();
    engine::replay(trace, opts, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

const TRACE: &str = r#"{
    "pid": 555,
    "events": [
        {"kind": "open", "fd": 4, "path": "/tmp/creds", "file_size": 64},
        {"kind": "read", "fd": 4, "buf": 65536, "nread": 32},
        {"kind": "process_exit"}
    ]
}"#;

#[test]
fn cli_flags_drive_the_file_taint_window_end_to_end() {
    let args = analyze_args([
        "secretgrind",
        "analyze",
        "--file-filter=/tmp/creds",
        "--file-taint-start=8",
        "--file-taint-len=16",
        "trace.json",
    ]);
    let opts = args.to_options();
    assert!(opts.validate().is_ok());

    let rendered = replay(TRACE, opts);
    assert!(rendered.contains("Total bytes tainted: 16"), "{rendered}");
    assert!(rendered.contains("0x10008 - 0x10017"), "{rendered}");
}

#[test]
fn unfiltered_file_reads_never_taint_anything() {
    let args = analyze_args(["secretgrind", "analyze", "trace.json"]);
    let opts = args.to_options();
    let rendered = replay(TRACE, opts);
    assert!(rendered.contains("No bytes tainted"), "{rendered}");
}

#[test]
fn summary_total_only_flag_suppresses_the_per_range_listing() {
    let args = analyze_args([
        "secretgrind",
        "analyze",
        "--file-filter=*",
        "--summary-total-only",
        "trace.json",
    ]);
    let opts = args.to_options();
    let rendered = replay(TRACE, opts);
    assert!(!rendered.contains("***"), "{rendered}");
    assert!(rendered.contains("Total bytes tainted: 32"), "{rendered}");
}

#[test]
fn trace_file_round_trips_through_real_file_io() {
    let mut file = tempfile_with_json(TRACE);
    file.flush().unwrap();
    let path = file.into_temp_path();

    let raw = std::fs::File::open(&path).unwrap();
    let trace: TraceFile = serde_json::from_reader(std::io::BufReader::new(raw)).unwrap();
    assert_eq!(trace.pid, 555);
    assert_eq!(trace.events.len(), 3);
}

fn tempfile_with_json(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

//! `secretgrind analyze <trace.json>`: parses CLI args into
//! [`secretgrind_core::Options`], deserializes a recorded trace, and replays
//! it against the engine, printing trace/summary output to stdout.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use secretgrind::cli::{self, Action, Opt};
use secretgrind::engine::{self, ReplayError};
use secretgrind::error::CliError;
use secretgrind::trace_format::TraceFile;

fn main() -> ExitCode {
    env_logger::init();
    let opt = Opt::parse();
    let Action::Analyze(args) = opt.action;

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("secretgrind: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &cli::AnalyzeArgs) -> Result<(), CliError> {
    let options = args.to_options();
    options.validate()?;

    let trace = load_trace(&args.trace)?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    match engine::replay(trace, options, &mut handle) {
        Ok(()) => Ok(()),
        Err(ReplayError::Io(e)) => Err(CliError::OpenTrace(args.trace.clone(), e)),
        Err(ReplayError::Invariant(e)) => {
            eprintln!("secretgrind: internal invariant violated: {e}");
            std::process::abort();
        }
    }
}

fn load_trace(path: &Path) -> Result<TraceFile, CliError> {
    let file = File::open(path).map_err(|e| CliError::OpenTrace(path.to_path_buf(), e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| CliError::ParseTrace(path.to_path_buf(), e))
}

//! Errors the CLI driver itself can hit, as opposed to the soft-warning
//! failure semantics the engine uses internally (spec.md §7). Every variant
//! here is something the original tool reports to stderr and exits 1 on.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("could not open trace file {0:?}: {1}")]
    OpenTrace(PathBuf, std::io::Error),

    #[error("could not parse {0:?} as a recorded trace: {1}")]
    ParseTrace(PathBuf, serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] secretgrind_core::ConfigError),
}

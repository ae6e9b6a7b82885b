//! Error taxonomy (spec.md §7). Two variants are genuinely fatal — a
//! misconfigured run or a broken internal invariant — everything else the
//! engine handles by degrading gracefully and logging, never by returning
//! `Err`.

use thiserror::Error;

/// Returned by configuration/setup code (`--file-filter` parsing, options
/// validation). The caller should report this and exit; there is no
/// meaningful way to keep running with a bad configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid file filter entry {0:?}: {1}")]
    InvalidFileFilter(String, &'static str),
}

/// An internal consistency violation: the shadow memory, provenance
/// registry, or IR instrumentation observed a state that should be
/// impossible if the host is calling into the engine correctly. These are
/// programming errors in the integration, not guest-data problems, so the
/// engine surfaces them as a hard error rather than attempting to continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("range [0x{0:x}, 0x{1:x}) straddles a registered block boundary")]
    StraddlingRange(u64, u64),

    #[error("SIMD load commit did not match its prepare")]
    SimdProtocolMismatch,
}

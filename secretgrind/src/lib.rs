//! The replay-driven CLI split into a library so its pieces — the trace
//! format, the offline host, and the engine-driving loop — are exercised by
//! integration tests the same way `main.rs` exercises them for real.

pub mod cli;
pub mod engine;
pub mod error;
pub mod offline_host;
pub mod trace_format;

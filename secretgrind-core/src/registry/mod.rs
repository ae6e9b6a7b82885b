//! Allocation tracking and provenance: every malloc/mmap becomes a [`Chunk`]
//! with provenance, kept in an index-addressed arena so ownership (masters,
//! sub-blocks, retained-with-children) is explicit rather than pointer-based.

pub mod alloc;
pub mod arena;
pub mod chunk;
pub mod provenance;

pub use alloc::{AllocationRegistry, ReleaseOutcome};
pub use chunk::{AddrClass, AllocApi, Chunk, ChunkId, ExecutionContext, Frame, InstProvenance};

//! A single recorded allocation/mapping and its provenance.

use std::fmt;

/// Which region of the address space a chunk lives in. Also the grouping key
/// used by the provenance registry's six per-class lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrClass {
    Global,
    HeapMalloc,
    MmapFile,
    MmapAnon,
    Stack,
    Other,
}

impl AddrClass {
    pub const ALL: [AddrClass; 6] = [
        AddrClass::Global,
        AddrClass::HeapMalloc,
        AddrClass::MmapFile,
        AddrClass::MmapAnon,
        AddrClass::Stack,
        AddrClass::Other,
    ];

    /// The tag printed next to a coalesced range in the taint summary.
    pub fn tag(self) -> &'static str {
        match self {
            AddrClass::Global => "global",
            AddrClass::HeapMalloc => "malloc",
            AddrClass::MmapFile => "mmap_file",
            AddrClass::MmapAnon => "mmap_anon",
            AddrClass::Stack => "stack",
            AddrClass::Other => "other",
        }
    }
}

impl fmt::Display for AddrClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The specific allocator entry point used, kept for summary wording
/// (`tnt_malloc_wrappers.c` distinguishes these, e.g. "new[]" vs "malloc").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocApi {
    Malloc,
    Calloc,
    Memalign,
    PosixMemalign,
    Realloc,
    New,
    NewArray,
    Mmap,
    Client,
}

impl AllocApi {
    pub fn name(self) -> &'static str {
        match self {
            AllocApi::Malloc => "malloc",
            AllocApi::Calloc => "calloc",
            AllocApi::Memalign => "memalign",
            AllocApi::PosixMemalign => "posix_memalign",
            AllocApi::Realloc => "realloc",
            AllocApi::New => "new",
            AllocApi::NewArray => "new[]",
            AllocApi::Mmap => "mmap",
            AllocApi::Client => "client-request",
        }
    }
}

/// One stack frame as captured by the host's stack-trace capture API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub pc: u64,
    pub description: Option<String>,
}

/// A captured execution context (a full stack trace), used for the
/// allocation/release/taint-origin traces attached to a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub frames: Vec<Frame>,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            let desc = frame.description.as_deref().unwrap_or("???");
            writeln!(f, "   at 0x{:x}: {}", frame.pc, desc)?;
            let _ = i;
        }
        Ok(())
    }
}

/// The IR-level instruction that produced a tainting event (for trace/summary
/// provenance). `id` is a monotonic counter assigned at `imark` time.
#[derive(Debug, Clone)]
pub struct InstProvenance {
    pub addr: u64,
    pub len: u8,
    pub raw_bytes: Vec<u8>,
    pub mnemonic: Option<String>,
    pub id: u64,
}

pub type ChunkId = usize;

/// A single dynamically-acquired memory region.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: u64,
    pub req_size: u64,
    pub slop_size: u64,
    pub addr_class: AddrClass,
    pub api: AllocApi,
    pub vname: Option<String>,
    pub alloc_trace: ExecutionContext,
    pub release_trace: Option<ExecutionContext>,
    pub taint_trace: Option<ExecutionContext>,
    pub parent: Option<ChunkId>,
    pub child_count: u32,
    pub master: bool,
    /// tainted via an explicit `make-mem-tainted` client request rather than
    /// a syscall/propagation event.
    pub api_tainted: bool,
    pub inst: Option<InstProvenance>,
}

impl Chunk {
    pub fn new(
        data: u64,
        req_size: u64,
        slop_size: u64,
        addr_class: AddrClass,
        api: AllocApi,
        alloc_trace: ExecutionContext,
    ) -> Self {
        Self {
            data,
            req_size,
            slop_size,
            addr_class,
            api,
            vname: None,
            alloc_trace,
            release_trace: None,
            taint_trace: None,
            parent: None,
            child_count: 0,
            master: true,
            api_tainted: false,
            inst: None,
        }
    }

    pub fn end(&self) -> u64 {
        self.data + self.req_size
    }

    pub fn contains_range(&self, addr: u64, len: u64) -> bool {
        addr >= self.data && addr + len <= self.end()
    }

    pub fn has_child(&self) -> bool {
        self.child_count > 0
    }

    /// Resolve the name shown in the summary: explicit name, else a
    /// verbose alloc-site description, else the anonymous
    /// `@0xADDR_class_pid_tid` fallback (synthesized by the caller, which
    /// knows pid/tid).
    pub fn detailed_name(&self, verbose: bool) -> Option<String> {
        if let Some(name) = &self.vname {
            return Some(name.clone());
        }
        if verbose && self.addr_class == AddrClass::HeapMalloc {
            return Some(format!("{}({})@0x{:x}", self.api.name(), self.req_size, self.data));
        }
        None
    }
}

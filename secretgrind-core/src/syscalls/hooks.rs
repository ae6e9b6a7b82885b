//! Syscall taint hooks (spec.md §4.3): `open`/`openat`, `read`/`pread`,
//! `lseek`/`llseek`, `mmap`/`munmap`, `close`. Each takes the concrete
//! syscall arguments/results the host DBI layer already decoded — this
//! module has no notion of raw registers or a real `/proc` tree.

use crate::config::Options;
use crate::filter::FileFilter;
use crate::registry::{AddrClass, AllocApi, AllocationRegistry, ExecutionContext};
use crate::shadow::{CellState, ShadowMemory};

use super::fd_table::{Fd, FdTable, Tid};

/// `whence` argument to `lseek`/`llseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// `open`/`openat`. `file_size` should come from an `fstat` the host performs
/// at open time (needed later for `SEEK_END`); `None` if the host couldn't
/// stat it (pipe, socket, etc). Resets `read_offset` to zero, per spec.md §4.3.
pub fn on_open(fds: &mut FdTable, tid: Tid, fd: Fd, path: &str, filter: &FileFilter, file_size: Option<u64>) {
    fds.open(tid, fd, path.to_string(), filter.matches(path), file_size);
}

/// Intersection of the configured `[file_taint_start, file_taint_start+file_taint_len)`
/// window with the bytes `[read_offset, read_offset+nread)` that this read just
/// delivered, expressed as a buffer-relative `(start, len)` to mark tainted.
fn taint_window_intersection(opts: &Options, read_offset: u64, nread: u64) -> Option<(u64, u64)> {
    let window_start = opts.file_taint_start;
    let window_end = opts.file_taint_start.saturating_add(opts.file_taint_len);
    let read_end = read_offset.saturating_add(nread);
    let lo = window_start.max(read_offset);
    let hi = window_end.min(read_end);
    if lo >= hi {
        return None;
    }
    Some((lo - read_offset, hi - lo))
}

/// `read(fd, buf, count)` returning `nread` actual bytes. If the fd is a
/// taint source, marks `[buf, buf+nread)` untainted first, then taints
/// exactly the slice that falls inside the configured file-taint window
/// (spec.md §4.3, scenario 1 in §8), and advances the cursor.
pub fn on_read(
    fds: &mut FdTable,
    shadow: &mut ShadowMemory,
    opts: &Options,
    tid: Tid,
    fd: Fd,
    buf: u64,
    nread: u64,
) {
    if nread == 0 {
        return;
    }
    let tainted = fds.is_tainted(tid, fd);
    let read_offset = fds.get(tid, fd).map(|e| e.cursor).unwrap_or(0);
    if let Some(entry) = fds.get_mut(tid, fd) {
        entry.cursor += nread;
    }
    if !tainted {
        return;
    }
    shadow.set_range(buf, nread, CellState::Untainted);
    if let Some((rel_start, len)) = taint_window_intersection(opts, read_offset, nread) {
        shadow.set_range(buf + rel_start, len, CellState::Tainted);
    }
}

/// `pread(fd, buf, count, offset)` — like `read` but never moves the cursor;
/// uses the explicit `offset` argument instead of the fd's stored cursor.
pub fn on_pread(
    fds: &FdTable,
    shadow: &mut ShadowMemory,
    opts: &Options,
    tid: Tid,
    fd: Fd,
    buf: u64,
    nread: u64,
    offset: u64,
) {
    if nread == 0 || !fds.is_tainted(tid, fd) {
        return;
    }
    shadow.set_range(buf, nread, CellState::Untainted);
    if let Some((rel_start, len)) = taint_window_intersection(opts, offset, nread) {
        shadow.set_range(buf + rel_start, len, CellState::Tainted);
    }
}

/// `lseek`/`llseek`. `SEEK_END` needs the cached `file_size`; if it's
/// unavailable, the new cursor cannot be computed and `None` is returned —
/// callers should treat this as a soft warning (spec.md §7), not fatal.
pub fn on_lseek(fds: &mut FdTable, tid: Tid, fd: Fd, offset: i64, whence: Whence) -> Option<u64> {
    let entry = fds.get_mut(tid, fd)?;
    let base = match whence {
        Whence::Set => 0,
        Whence::Cur => entry.cursor as i64,
        Whence::End => entry.file_size? as i64,
    };
    let new_cursor = (base + offset).max(0) as u64;
    entry.cursor = new_cursor;
    Some(new_cursor)
}

/// `mmap` of a file-backed region. Rounds `[offset, offset+len)` up to whole
/// `file_mmap_pagesize` multiples (spec.md §4.3: "the range is always rounded
/// up to a whole page multiple" under default taint-param settings), records
/// a master `mmap_file` chunk, and — if the fd taints — marks the
/// page-rounded range intersected with the file-taint window as tainted.
#[allow(clippy::too_many_arguments)]
pub fn on_mmap_file(
    registry: &mut AllocationRegistry,
    shadow: &mut ShadowMemory,
    fds: &FdTable,
    opts: &Options,
    tid: Tid,
    fd: Fd,
    addr: u64,
    offset: u64,
    len: u64,
    alloc_trace: ExecutionContext,
) {
    let page = opts.file_mmap_pagesize;
    let rounded_len = (len + page - 1) / page * page;
    registry.record_alloc(addr, rounded_len, 0, AddrClass::MmapFile, AllocApi::Mmap, alloc_trace, None);
    if !fds.is_tainted(tid, fd) {
        return;
    }
    if let Some((rel_start, isect_len)) = taint_window_intersection(opts, offset, rounded_len) {
        shadow.set_range(addr + rel_start, isect_len, CellState::Tainted);
    }
}

/// Anonymous `mmap` (no backing fd): never a taint source by itself.
pub fn on_mmap_anon(registry: &mut AllocationRegistry, addr: u64, len: u64, alloc_trace: ExecutionContext) {
    registry.record_alloc(addr, len, 0, AddrClass::MmapAnon, AllocApi::Mmap, alloc_trace, None);
}

pub fn on_munmap(
    registry: &mut AllocationRegistry,
    shadow: &mut ShadowMemory,
    addr: u64,
    warn_on_release: bool,
    remove_on_release: bool,
) {
    registry.munmap(addr, shadow, warn_on_release, remove_on_release);
}

pub fn on_close(fds: &mut FdTable, tid: Tid, fd: Fd) {
    fds.close(tid, fd);
}

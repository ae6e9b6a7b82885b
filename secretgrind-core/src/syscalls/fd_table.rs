//! Per-thread, per-file-descriptor taint state (spec.md §4.3): whether bytes
//! read from this fd should be marked tainted, and enough bookkeeping
//! (cursor, cached file size) to answer `lseek(SEEK_END)` without a real
//! `fstat` call.

use rustc_hash::FxHashMap;

pub type Tid = u32;
pub type Fd = i32;

#[derive(Debug, Clone)]
pub struct FdEntry {
    pub path: String,
    pub tainted: bool,
    pub cursor: u64,
    /// Populated from the host's `fstat` at `open` time; `None` for fds the
    /// host couldn't stat (pipes, sockets) — `SEEK_END` on those is a soft
    /// warning, not a crash (spec.md §7).
    pub file_size: Option<u64>,
}

#[derive(Default)]
pub struct FdTable {
    entries: FxHashMap<(Tid, Fd), FdEntry>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, tid: Tid, fd: Fd, path: String, tainted: bool, file_size: Option<u64>) {
        self.entries.insert(
            (tid, fd),
            FdEntry {
                path,
                tainted,
                cursor: 0,
                file_size,
            },
        );
    }

    pub fn get(&self, tid: Tid, fd: Fd) -> Option<&FdEntry> {
        self.entries.get(&(tid, fd))
    }

    pub fn get_mut(&mut self, tid: Tid, fd: Fd) -> Option<&mut FdEntry> {
        self.entries.get_mut(&(tid, fd))
    }

    pub fn close(&mut self, tid: Tid, fd: Fd) -> Option<FdEntry> {
        self.entries.remove(&(tid, fd))
    }

    pub fn is_tainted(&self, tid: Tid, fd: Fd) -> bool {
        self.get(tid, fd).map(|e| e.tainted).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close_round_trips() {
        let mut t = FdTable::new();
        t.open(1, 3, "/etc/passwd".into(), true, Some(128));
        assert!(t.is_tainted(1, 3));
        let closed = t.close(1, 3).unwrap();
        assert_eq!(closed.path, "/etc/passwd");
        assert!(t.get(1, 3).is_none());
    }

    #[test]
    fn unopened_fd_is_untainted_by_default() {
        let t = FdTable::new();
        assert!(!t.is_tainted(1, 99));
    }

    #[test]
    fn distinct_threads_have_independent_fd_namespaces() {
        let mut t = FdTable::new();
        t.open(1, 3, "/a".into(), true, None);
        t.open(2, 3, "/b".into(), false, None);
        assert!(t.is_tainted(1, 3));
        assert!(!t.is_tainted(2, 3));
    }
}

//! Taint hooks the host calls on syscall entry/exit (spec.md §4.3).

pub mod fd_table;
pub mod hooks;

pub use fd_table::{Fd, FdEntry, FdTable, Tid};
pub use hooks::{on_close, on_lseek, on_mmap_anon, on_mmap_file, on_munmap, on_open, on_pread, on_read, Whence};

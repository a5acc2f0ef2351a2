pub mod checkpoint;
pub mod compaction;
pub mod file_lock;
pub mod format;
pub mod io_worker;
pub mod layout;
pub mod wal;

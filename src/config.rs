use std::path::PathBuf;
use std::time::Duration;

/// IO backend used for log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Buffered positional reads and writes with explicit fsync.
    FileIo,
    /// Memory-mapped files; sync flushes the dirty mapping.
    Mmap,
}

/// Whether the string index caches values in memory or only log positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Index stores positions only; reads fetch values from the logs.
    KeyOnly,
    /// Index stores the value alongside the position; reads never touch disk.
    KeyValue,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Data directory root.
    pub db_path: PathBuf,

    /// Log file IO backend (default: FileIo).
    pub io_type: IoType,

    /// String index mode (default: KeyOnly).
    pub index_mode: IndexMode,

    /// Rotation threshold for log files in bytes (default: 512MB).
    pub log_file_size_threshold: u64,

    /// How often the GC worker runs (default: 8h, zero disables).
    pub log_file_gc_interval: Duration,

    /// Minimum dead-byte fraction for a file to be GC-eligible (default: 0.5).
    pub log_file_gc_ratio: f64,

    /// How often non-string indexes are dumped to disk (default: 8h, zero disables).
    pub in_memory_dump_interval: Duration,

    /// Fsync after every write (default: false).
    pub sync_writes: bool,
}

impl Options {
    /// Create options for the given data directory with default settings.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            io_type: IoType::FileIo,
            index_mode: IndexMode::KeyOnly,
            log_file_size_threshold: 512 * 1024 * 1024,
            log_file_gc_interval: Duration::from_secs(8 * 3600),
            log_file_gc_ratio: 0.5,
            in_memory_dump_interval: Duration::from_secs(8 * 3600),
            sync_writes: false,
        }
    }

    /// Set the IO backend.
    pub fn io_type(mut self, io_type: IoType) -> Self {
        self.io_type = io_type;
        self
    }

    /// Set the string index mode.
    pub fn index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Set the log file rotation threshold.
    pub fn log_file_size_threshold(mut self, bytes: u64) -> Self {
        self.log_file_size_threshold = bytes;
        self
    }

    /// Set the GC worker interval.
    pub fn log_file_gc_interval(mut self, interval: Duration) -> Self {
        self.log_file_gc_interval = interval;
        self
    }

    /// Set the minimum dead-byte fraction for GC candidates.
    pub fn log_file_gc_ratio(mut self, ratio: f64) -> Self {
        self.log_file_gc_ratio = ratio;
        self
    }

    /// Set the index dump interval.
    pub fn in_memory_dump_interval(mut self, interval: Duration) -> Self {
        self.in_memory_dump_interval = interval;
        self
    }

    /// Fsync after every write.
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }
}

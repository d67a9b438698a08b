//! The database: five per-type stores behind per-type locks, a data
//! directory lock, and two background workers (GC and index dump).

pub mod iterator;
pub mod strs;

pub mod hash;
pub mod list;
pub mod set;
pub mod zset;

mod dump;
mod gc;
mod recovery;
mod store;
mod tasks;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::index::{HashIndex, ListIndex, SetIndex, StrIndex, ZSetIndex};
use crate::storage::{DataType, FileSet};
use crate::worker::Scheduler;

pub(crate) use store::{HashStore, ListStore, SetStore, StrStore, TypeStore, ZSetStore};

const LOCK_FILE: &str = "FLOCK";

/// Everything the background workers share with the front-end handle.
pub(crate) struct Core {
    pub opts: Options,
    pub closed: AtomicBool,
    pub gc_running: AtomicBool,
    pub strs: RwLock<StrStore>,
    pub hashes: RwLock<HashStore>,
    pub lists: RwLock<ListStore>,
    pub sets: RwLock<SetStore>,
    pub zsets: RwLock<ZSetStore>,
}

impl Core {
    pub fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// An open database. All operations take `&self`; per-type reader/writer
/// locks serialize them internally.
pub struct RoseDB {
    pub(crate) core: Arc<Core>,
    lock: Mutex<Option<FileLock>>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl std::fmt::Debug for RoseDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoseDB").finish_non_exhaustive()
    }
}

impl RoseDB {
    /// Open (or create) a database in `opts.db_path`, recover the indexes
    /// from the logs, and start the background workers.
    pub fn open(opts: Options) -> Result<Self> {
        fs::create_dir_all(&opts.db_path)?;
        let lock = FileLock::lock(opts.db_path.join(LOCK_FILE))?;

        let dir = opts.db_path.clone();
        let core = Arc::new(Core {
            strs: RwLock::new(StrStore {
                files: FileSet::open(&dir, DataType::Strs, &opts)?,
                index: StrIndex::new(),
                mode: opts.index_mode,
            }),
            hashes: RwLock::new(HashStore {
                files: FileSet::open(&dir, DataType::Hash, &opts)?,
                index: HashIndex::new(),
            }),
            lists: RwLock::new(ListStore {
                files: FileSet::open(&dir, DataType::List, &opts)?,
                index: ListIndex::new(),
            }),
            sets: RwLock::new(SetStore {
                files: FileSet::open(&dir, DataType::Sets, &opts)?,
                index: SetIndex::new(),
            }),
            zsets: RwLock::new(ZSetStore {
                files: FileSet::open(&dir, DataType::ZSet, &opts)?,
                index: ZSetIndex::new(),
            }),
            opts,
            closed: AtomicBool::new(false),
            gc_running: AtomicBool::new(false),
        });

        recovery::recover(&core)?;

        let mut scheduler = Scheduler::new();
        scheduler.register(Arc::new(tasks::GcTask::new(core.clone())));
        scheduler.register(Arc::new(tasks::DumpTask::new(core.clone())));

        Ok(Self {
            core,
            lock: Mutex::new(Some(lock)),
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Stop the background workers (waiting out any in-flight file), sync
    /// and close every log file, and release the directory lock. Idempotent;
    /// every operation after this returns `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut scheduler) = self.scheduler.lock()?.take() {
            scheduler.shutdown();
        }

        self.core.strs.write()?.files.close()?;
        self.core.hashes.write()?.files.close()?;
        self.core.lists.write()?.files.close()?;
        self.core.sets.write()?.files.close()?;
        self.core.zsets.write()?.files.close()?;

        self.lock.lock()?.take();
        tracing::info!(path = %self.core.opts.db_path.display(), "database closed");
        Ok(())
    }

    /// Run one GC pass over every data type, regardless of the timer. The
    /// same code path the background worker uses.
    pub fn run_gc(&self) -> Result<()> {
        self.core.check_open()?;
        gc::run(&self.core)
    }

    /// Dump every non-string index to its snapshot file, regardless of the
    /// timer.
    pub fn run_dump(&self) -> Result<()> {
        self.core.check_open()?;
        dump::run(&self.core)
    }

    /// Flush every active log file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.core.check_open()?;
        self.core.strs.write()?.files.sync()?;
        self.core.hashes.write()?.files.sync()?;
        self.core.lists.write()?.files.sync()?;
        self.core.sets.write()?.files.sync()?;
        self.core.zsets.write()?.files.sync()?;
        Ok(())
    }

    /// Bytes of log data on disk across all types (logical sizes).
    pub fn disk_usage(&self) -> Result<u64> {
        self.core.check_open()?;
        let mut total = self.core.strs.read()?.files.total_bytes();
        total += self.core.hashes.read()?.files.total_bytes();
        total += self.core.lists.read()?.files.total_bytes();
        total += self.core.sets.read()?.files.total_bytes();
        total += self.core.zsets.read()?.files.total_bytes();
        Ok(total)
    }
}

impl Drop for RoseDB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "close on drop failed");
        }
    }
}

pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("empty key".to_string()));
    }
    Ok(())
}

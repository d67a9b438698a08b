//! Garbage collection: merge sealed log files with enough dead bytes into
//! the active file and delete them.
//!
//! Candidates are snapshotted under a brief shared lock, then each file is
//! scanned lock-free through a private read-only handle, fid-ascending and
//! offset-ascending. Only the per-entry "is this position still live, and
//! if so rewrite it" step takes the type's exclusive lock, so writers are
//! never blocked for longer than one entry. A concurrent overwrite simply
//! makes the scanned position stale, which reads as dead.

use std::sync::RwLock;

use crate::config::IoType;
use crate::error::{Error, Result};
use crate::storage::{DataType, LogFile, ValuePosition};

use super::{Core, TypeStore};

/// One full pass over all five types. Per-file errors abort that file only;
/// the rest of the pass continues and the timer retries later. At most one
/// pass runs at a time: an overlapping call returns immediately.
pub(crate) fn run(core: &Core) -> Result<()> {
    use std::sync::atomic::Ordering;

    if core.gc_running.swap(true, Ordering::SeqCst) {
        tracing::debug!("gc pass already running, skipping");
        return Ok(());
    }
    let result = run_pass(core);
    core.gc_running.store(false, Ordering::SeqCst);
    result
}

fn run_pass(core: &Core) -> Result<()> {
    merge_type(core, &core.strs)?;
    merge_type(core, &core.hashes)?;
    merge_type(core, &core.lists)?;
    merge_type(core, &core.sets)?;
    merge_type(core, &core.zsets)?;
    Ok(())
}

fn merge_type<S: TypeStore>(core: &Core, shard: &RwLock<S>) -> Result<()> {
    let (data_type, candidates) = {
        let store = shard.read()?;
        (
            store.files().data_type(),
            store.files().gc_candidates(core.opts.log_file_gc_ratio),
        )
    };

    for fid in candidates {
        if core.is_closed() {
            break;
        }
        match merge_file(core, shard, data_type, fid) {
            Ok(true) => {}
            Ok(false) => break, // shutdown mid-file; leave it in place
            Err(e) => {
                tracing::error!(
                    data_type = %data_type,
                    fid,
                    error = %e,
                    "merge failed, leaving file in place"
                );
            }
        }
    }
    Ok(())
}

/// Merge one sealed file. Returns false when shutdown interrupted the scan.
fn merge_file<S: TypeStore>(
    core: &Core,
    shard: &RwLock<S>,
    data_type: DataType,
    fid: u32,
) -> Result<bool> {
    // A private handle so the scan itself holds no lock. Sealed files are
    // immutable, so plain buffered IO is always the right backend here.
    let scan = LogFile::open(&core.opts.db_path, data_type, fid, IoType::FileIo, 0)?;

    let mut offset = 0u64;
    let mut scanned = 0u64;
    loop {
        if core.is_closed() {
            return Ok(false);
        }
        match scan.read_at_offset(offset) {
            Ok((entry, consumed)) => {
                let old = ValuePosition::new(fid, offset, consumed as u32);
                {
                    let mut store = shard.write()?;
                    store.relocate(&entry, old)?;
                }
                scanned += 1;
                offset += consumed as u64;
            }
            // End of real data: a torn tail or mmap padding.
            Err(Error::Truncated) | Err(Error::CorruptEntry(_)) => break,
            Err(e) => return Err(e),
        }
    }

    let mut store = shard.write()?;
    store.files_mut().remove_file(fid)?;
    tracing::info!(
        data_type = %data_type,
        fid,
        entries = scanned,
        "merged log file"
    );
    Ok(true)
}

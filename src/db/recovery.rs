//! Startup recovery: rebuild every in-memory index from the logs, loading a
//! snapshot first for the non-string types when a valid one exists.
//!
//! Replay walks each file from offset 0 in fid order. A `Truncated` or
//! `CorruptEntry` read means the file ends there, either a torn append from
//! a crash or mmap padding; the file is cut back to the last good entry
//! and replay moves on. Everything before the cut stays readable.

use crate::error::{Error, Result};
use crate::storage::ValuePosition;

use super::dump;
use super::store::now_nanos;
use super::{Core, TypeStore};

pub(crate) fn recover(core: &Core) -> Result<()> {
    let started = std::time::Instant::now();
    let now = now_nanos();

    // Strings have no snapshot; their index is compact and rebuilt in full.
    {
        let mut store = core.strs.write()?;
        let fids = store.files.all_fids();
        replay_files(&mut *store, &fids, now)?;
        tracing::debug!(keys = store.index.len(), "string index rebuilt");
    }

    recover_with_dump(core, &mut *core.hashes.write()?, now)?;
    recover_with_dump(core, &mut *core.lists.write()?, now)?;
    recover_with_dump(core, &mut *core.sets.write()?, now)?;
    recover_with_dump(core, &mut *core.zsets.write()?, now)?;

    tracing::info!(
        path = %core.opts.db_path.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recovery complete"
    );
    Ok(())
}

/// Load the type's dump if one is valid, then replay only the log tail
/// above its watermark; otherwise replay the whole series.
fn recover_with_dump<S: dump::DumpStore>(core: &Core, store: &mut S, now: i64) -> Result<()> {
    let watermark = dump::load(core, &mut *store)?;

    let fids: Vec<u32> = store
        .files()
        .all_fids()
        .into_iter()
        .filter(|fid| watermark.map_or(true, |w| *fid > w))
        .collect();
    replay_files(store, &fids, now)
}

fn replay_files<S: TypeStore + ?Sized>(store: &mut S, fids: &[u32], now: i64) -> Result<()> {
    for &fid in fids {
        let mut offset = 0u64;
        loop {
            let read = store
                .files()
                .file(fid)
                .ok_or_else(|| Error::Io(format!("log file {fid} vanished during replay")))?
                .read_at_offset(offset);

            match read {
                Ok((entry, consumed)) => {
                    let pos = ValuePosition::new(fid, offset, consumed as u32);
                    store.replay(entry, pos, now)?;
                    offset += consumed as u64;
                }
                Err(Error::Truncated) | Err(Error::CorruptEntry(_)) => {
                    // End of good data: cut the file here so the append
                    // offset and the on-disk bytes agree again.
                    let file = store.files_mut().file_mut(fid).ok_or_else(|| {
                        Error::Io(format!("log file {fid} vanished during replay"))
                    })?;
                    if offset < file.write_at() {
                        tracing::warn!(
                            fid,
                            offset,
                            file_len = file.write_at(),
                            "log tail unreadable, truncating"
                        );
                    }
                    file.truncate(offset)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

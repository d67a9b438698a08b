//! Per-type log file manager.
//!
//! One `FileSet` owns the single writable (active) file of a data type, the
//! sealed archive behind it, and the per-file discard accounting that drives
//! GC candidate selection. Fid allocation is `max(existing) + 1`; the file
//! names on disk are the canonical record of which fids exist.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::config::{IoType, Options};
use crate::error::{Error, Result};

use super::entry::LogEntry;
use super::logfile::LogFile;
use super::{DataType, ValuePosition};

const FIRST_FID: u32 = 1;

pub struct FileSet {
    dir: PathBuf,
    data_type: DataType,
    io_type: IoType,
    threshold: u64,
    sync_writes: bool,
    active: LogFile,
    archived: BTreeMap<u32, LogFile>,
    /// Dead bytes per fid. Monotonically non-decreasing, bounded by the
    /// file's total size.
    discards: HashMap<u32, u64>,
}

impl FileSet {
    /// Open the file series of `data_type` under `dir`. The highest existing
    /// fid becomes the active file; a fresh series starts at fid 1.
    pub fn open(dir: &Path, data_type: DataType, opts: &Options) -> Result<Self> {
        let mut fids = Vec::new();
        for dirent in std::fs::read_dir(dir)? {
            let dirent = dirent?;
            if let Some(name) = dirent.file_name().to_str() {
                if let Some(fid) = LogFile::parse_fid(name, data_type) {
                    fids.push(fid);
                }
            }
        }
        let fids: Vec<u32> = fids.into_iter().sorted().collect();

        let threshold = opts.log_file_size_threshold;
        let (active, archived) = match fids.split_last() {
            None => {
                let active =
                    LogFile::create(dir, data_type, FIRST_FID, opts.io_type, threshold)?;
                (active, BTreeMap::new())
            }
            Some((&max_fid, rest)) => {
                let active = LogFile::open(dir, data_type, max_fid, opts.io_type, threshold)?;
                let mut archived = BTreeMap::new();
                for &fid in rest {
                    // Sealed files are read-only; map only their real length.
                    let file = LogFile::open(dir, data_type, fid, opts.io_type, 0)?;
                    archived.insert(fid, file);
                }
                (active, archived)
            }
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            data_type,
            io_type: opts.io_type,
            threshold,
            sync_writes: opts.sync_writes,
            active,
            archived,
            discards: HashMap::new(),
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn active_fid(&self) -> u32 {
        self.active.fid()
    }

    /// Logical size of the active file.
    pub fn active_len(&self) -> u64 {
        self.active.write_at()
    }

    /// Highest sealed fid, if any file has been sealed.
    pub fn max_archived_fid(&self) -> Option<u32> {
        self.archived.keys().next_back().copied()
    }

    /// Every fid in the series, ascending, active last.
    pub fn all_fids(&self) -> Vec<u32> {
        let mut fids: Vec<u32> = self.archived.keys().copied().collect();
        fids.push(self.active.fid());
        fids
    }

    pub fn file(&self, fid: u32) -> Option<&LogFile> {
        if fid == self.active.fid() {
            Some(&self.active)
        } else {
            self.archived.get(&fid)
        }
    }

    pub fn file_mut(&mut self, fid: u32) -> Option<&mut LogFile> {
        if fid == self.active.fid() {
            Some(&mut self.active)
        } else {
            self.archived.get_mut(&fid)
        }
    }

    /// Append an entry, rotating first when the active file would exceed the
    /// size threshold. Returns where the entry landed.
    pub fn append_entry(&mut self, entry: &LogEntry) -> Result<ValuePosition> {
        let encoded_len = entry.encoded_len() as u64;
        if self.active.write_at() + encoded_len > self.threshold && self.active.write_at() > 0 {
            self.rotate()?;
        }
        let (offset, size) = self.active.append(entry)?;
        if self.sync_writes {
            self.active.sync()?;
        }
        Ok(ValuePosition::new(self.active.fid(), offset, size))
    }

    /// Read the entry a position points at.
    pub fn read(&self, pos: ValuePosition) -> Result<LogEntry> {
        let file = self.file(pos.fid).ok_or_else(|| {
            Error::CorruptEntry(format!(
                "{} position points at missing fid {}",
                self.data_type, pos.fid
            ))
        })?;
        file.read(pos)
    }

    /// Seal the active file and start a fresh one at the next fid.
    pub fn rotate(&mut self) -> Result<()> {
        self.active.sync()?;
        // Give back any mmap slack; sealed files keep only real data.
        let sealed_len = self.active.write_at();
        self.active.truncate(sealed_len)?;

        let next_fid = self.active.fid() + 1;
        let fresh = LogFile::create(&self.dir, self.data_type, next_fid, self.io_type, self.threshold)?;
        let sealed = std::mem::replace(&mut self.active, fresh);
        tracing::debug!(
            data_type = %self.data_type,
            sealed_fid = sealed.fid(),
            active_fid = next_fid,
            "rotated log file"
        );
        self.archived.insert(sealed.fid(), sealed);
        Ok(())
    }

    /// Record `bytes` of a file as dead.
    pub fn discard(&mut self, fid: u32, bytes: u32) {
        *self.discards.entry(fid).or_insert(0) += u64::from(bytes);
    }

    pub fn discard_bytes(&self, fid: u32) -> u64 {
        self.discards.get(&fid).copied().unwrap_or(0)
    }

    /// Sealed files whose dead fraction reaches `ratio`, ascending by fid.
    /// The active file is never a candidate.
    pub fn gc_candidates(&self, ratio: f64) -> Vec<u32> {
        self.archived
            .iter()
            .filter(|(fid, file)| {
                let total = file.write_at().max(1);
                let dead = self.discard_bytes(**fid);
                dead as f64 / total as f64 >= ratio
            })
            .map(|(fid, _)| *fid)
            .collect()
    }

    /// True when a sealed file with a fid lower than `fid` still exists.
    pub fn has_archived_below(&self, fid: u32) -> bool {
        self.archived.keys().next().is_some_and(|lowest| *lowest < fid)
    }

    /// Close and delete a sealed file, forgetting its discard counter.
    pub fn remove_file(&mut self, fid: u32) -> Result<()> {
        if let Some(mut file) = self.archived.remove(&fid) {
            file.delete()?;
            tracing::info!(data_type = %self.data_type, fid, "deleted log file");
        }
        self.discards.remove(&fid);
        Ok(())
    }

    /// Bytes on disk across the whole series (logical sizes).
    pub fn total_bytes(&self) -> u64 {
        let archived: u64 = self.archived.values().map(|f| f.write_at()).sum();
        archived + self.active.write_at()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.active.sync()
    }

    /// Sync and close every file. The set must not be used afterwards.
    pub fn close(&mut self) -> Result<()> {
        self.active.sync()?;
        let len = self.active.write_at();
        self.active.truncate(len)?;
        self.active.close()?;
        for file in self.archived.values_mut() {
            file.close()?;
        }
        Ok(())
    }
}

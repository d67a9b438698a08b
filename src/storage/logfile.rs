//! A single append-only log file.
//!
//! Files are named `<type>.<fid>.LOG` with the fid zero-padded for natural
//! sort; the file names on disk are the canonical record of which fids
//! exist. Only the highest-fid file of a type is writable; everything else
//! is sealed.

use std::path::{Path, PathBuf};

use crate::config::IoType;
use crate::error::{Error, Result};

use super::entry::{EntryHeader, LogEntry, MAX_HEADER_SIZE};
use super::io::{open_backend, IoBackend};
use super::{DataType, ValuePosition};

pub const LOG_SUFFIX: &str = ".LOG";

pub struct LogFile {
    fid: u32,
    path: PathBuf,
    io: Box<dyn IoBackend>,
    write_at: u64,
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("fid", &self.fid)
            .field("path", &self.path)
            .field("write_at", &self.write_at)
            .finish()
    }
}

impl LogFile {
    /// On-disk file name for `(data_type, fid)`.
    pub fn file_name(data_type: DataType, fid: u32) -> String {
        format!("{}.{:09}{}", data_type.name(), fid, LOG_SUFFIX)
    }

    /// Parse a fid back out of a file name, if it belongs to `data_type`.
    pub fn parse_fid(name: &str, data_type: DataType) -> Option<u32> {
        let rest = name.strip_prefix(data_type.name())?.strip_prefix('.')?;
        let fid = rest.strip_suffix(LOG_SUFFIX)?;
        fid.parse::<u32>().ok()
    }

    /// Open an existing log file. `write_at` starts at the file length; the
    /// recovery replay corrects it for files with a torn or padded tail.
    pub fn open(
        dir: &Path,
        data_type: DataType,
        fid: u32,
        io_type: IoType,
        capacity: u64,
    ) -> Result<Self> {
        let path = dir.join(Self::file_name(data_type, fid));
        let io = open_backend(io_type, &path, capacity)?;
        let write_at = io.size()?;
        Ok(Self {
            fid,
            path,
            io,
            write_at,
        })
    }

    /// Create a fresh, empty log file to append to.
    pub fn create(
        dir: &Path,
        data_type: DataType,
        fid: u32,
        io_type: IoType,
        capacity: u64,
    ) -> Result<Self> {
        let mut file = Self::open(dir, data_type, fid, io_type, capacity)?;
        file.write_at = 0;
        Ok(file)
    }

    pub fn fid(&self) -> u32 {
        self.fid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical end of data; the next append lands here.
    pub fn write_at(&self) -> u64 {
        self.write_at
    }

    pub fn set_write_at(&mut self, offset: u64) {
        self.write_at = offset;
    }

    /// Encode and append an entry, returning its offset and encoded size.
    pub fn append(&mut self, entry: &LogEntry) -> Result<(u64, u32)> {
        let encoded = entry.encode();
        let offset = self.write_at;
        self.io.write_at(&encoded, offset)?;
        self.write_at += encoded.len() as u64;
        Ok((offset, encoded.len() as u32))
    }

    /// Read the entry at a known position. The position's size makes this a
    /// single IO.
    pub fn read(&self, pos: ValuePosition) -> Result<LogEntry> {
        let mut buf = vec![0u8; pos.size as usize];
        let n = self.io.read_at(&mut buf, pos.offset)?;
        if n < buf.len() {
            return Err(Error::Truncated);
        }
        let (entry, _) = LogEntry::decode(&buf)?;
        Ok(entry)
    }

    /// Read the entry starting at `offset` without knowing its size, as the
    /// replay and GC scans must. Returns the entry and its encoded size.
    pub fn read_at_offset(&self, offset: u64) -> Result<(LogEntry, usize)> {
        let mut probe = vec![0u8; MAX_HEADER_SIZE];
        let n = self.io.read_at(&mut probe, offset)?;
        probe.truncate(n);
        let header = EntryHeader::decode(&probe)?;

        let total = header.total_len();
        let mut buf = vec![0u8; total];
        let n = self.io.read_at(&mut buf, offset)?;
        if n < total {
            return Err(Error::Truncated);
        }
        LogEntry::decode(&buf)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.io.sync()
    }

    /// Shrink the file to `len` and reset the append offset there. Used when
    /// recovery finds a torn tail, and when a sealed mmap file gives back its
    /// unused capacity.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.io.truncate(len)?;
        self.write_at = len;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.io.close()
    }

    pub fn delete(&mut self) -> Result<()> {
        self.io.delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CAP: u64 = 64 * 1024;

    fn open_file(dir: &Path, io_type: IoType) -> LogFile {
        LogFile::create(dir, DataType::Strs, 1, io_type, CAP).unwrap()
    }

    #[test]
    fn test_file_name_roundtrip() {
        let name = LogFile::file_name(DataType::Hash, 42);
        assert_eq!(name, "hash.000000042.LOG");
        assert_eq!(LogFile::parse_fid(&name, DataType::Hash), Some(42));
        assert_eq!(LogFile::parse_fid(&name, DataType::Strs), None);
        assert_eq!(LogFile::parse_fid("hash.DUMP", DataType::Hash), None);
    }

    #[test]
    fn test_append_then_read() {
        let dir = tempdir().unwrap();
        let mut file = open_file(dir.path(), IoType::FileIo);

        let entry = LogEntry::put(b"k".to_vec(), b"v".to_vec(), 0);
        let (offset, size) = file.append(&entry).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(file.write_at(), size as u64);

        let read = file.read(ValuePosition::new(1, offset, size)).unwrap();
        assert_eq!(read, entry);
    }

    #[test]
    fn test_sequential_scan() {
        let dir = tempdir().unwrap();
        let mut file = open_file(dir.path(), IoType::FileIo);

        let mut offsets = Vec::new();
        for i in 0..10 {
            let entry = LogEntry::put(format!("k-{i}").into_bytes(), vec![b'x'; i], 0);
            offsets.push(file.append(&entry).unwrap());
        }

        let mut at = 0u64;
        for (i, (offset, size)) in offsets.iter().enumerate() {
            assert_eq!(at, *offset);
            let (entry, consumed) = file.read_at_offset(at).unwrap();
            assert_eq!(entry.key, format!("k-{i}").into_bytes());
            assert_eq!(consumed as u32, *size);
            at += consumed as u64;
        }
        assert_eq!(at, file.write_at());
    }

    #[test]
    fn test_scan_stops_at_zero_padding() {
        // Mmap files are padded with zeroes past the logical end; decoding
        // the padding must fail (and read as end-of-log), not loop.
        let dir = tempdir().unwrap();
        let mut file = open_file(dir.path(), IoType::Mmap);

        let entry = LogEntry::put(b"k".to_vec(), b"v".to_vec(), 0);
        let (_, size) = file.append(&entry).unwrap();

        let err = file.read_at_offset(size as u64).unwrap_err();
        assert!(matches!(err, Error::CorruptEntry(_)));
    }

    #[test]
    fn test_torn_tail_reads_as_truncated() {
        let dir = tempdir().unwrap();
        let mut file = open_file(dir.path(), IoType::FileIo);

        let entry = LogEntry::put(b"key-1".to_vec(), b"value-1".to_vec(), 0);
        let (_, size) = file.append(&entry).unwrap();
        file.truncate(size as u64 - 3).unwrap();

        assert_eq!(file.read_at_offset(0).unwrap_err(), Error::Truncated);
    }

    #[test]
    fn test_mmap_write_at_tracks_logical_end() {
        let dir = tempdir().unwrap();
        let mut file = open_file(dir.path(), IoType::Mmap);
        assert_eq!(file.write_at(), 0);

        let entry = LogEntry::put(b"k".to_vec(), b"v".to_vec(), 0);
        let (_, size) = file.append(&entry).unwrap();
        assert_eq!(file.write_at(), size as u64);

        // The on-disk file keeps its mapped capacity until sealed.
        file.truncate(size as u64).unwrap();
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), size as u64);
    }
}

//! IO backends for log files.
//!
//! Two variants expose the same capability set: `FileIo` issues positional
//! read/write syscalls with explicit fsync; `MmapIo` maps the file
//! read-write and serves both directions through the mapping. The backend is
//! chosen when a file is opened and fixed for its lifetime.
//!
//! Short reads return fewer bytes with no error; writes at EOF extend the
//! file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::Result;

/// Capability set shared by both backends.
pub trait IoBackend: Send + Sync {
    /// Write `buf` at `offset`, extending the file as needed.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes
    /// read; fewer than requested means the file ended.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Flush written data to stable storage.
    fn sync(&mut self) -> Result<()>;

    /// Shrink or extend the file to `len` bytes.
    fn truncate(&mut self, len: u64) -> Result<()>;

    /// Current file length in bytes.
    fn size(&self) -> Result<u64>;

    /// Flush and release resources. The backend must not be used afterwards.
    fn close(&mut self) -> Result<()>;

    /// Remove the file from disk.
    fn delete(&mut self) -> Result<()>;
}

/// Positional-syscall backend.
pub struct FileIo {
    file: File,
    path: PathBuf,
}

impl FileIo {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl IoBackend for FileIo {
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.write_all_at(buf, offset)?;
        Ok(buf.len())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut read = 0;
        while read < buf.len() {
            let n = self.file.read_at(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn close(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Memory-mapped backend.
///
/// The file is pre-extended to `capacity` so the whole mapping is backed by
/// real file bytes; the log file layer tracks the logical end of data and
/// truncates the slack away when the file is sealed or closed.
pub struct MmapIo {
    file: File,
    map: Option<MmapMut>,
    path: PathBuf,
}

impl MmapIo {
    pub fn open(path: &Path, capacity: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        if file.metadata()?.len() < capacity {
            file.set_len(capacity)?;
        }
        // An empty file cannot be mapped; the first write maps it lazily.
        let map = if file.metadata()?.len() > 0 {
            Some(unsafe { MmapMut::map_mut(&file)? })
        } else {
            None
        };
        Ok(Self {
            file,
            map,
            path: path.to_path_buf(),
        })
    }

    fn mapped_len(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    /// Grow the file and remap. Rotation normally keeps writes under the
    /// mapped capacity; this is the escape hatch for oversized entries.
    fn grow(&mut self, min_len: u64) -> Result<()> {
        let mut new_len = self
            .file
            .metadata()?
            .len()
            .max(self.mapped_len() as u64)
            .max(1);
        while new_len < min_len {
            new_len *= 2;
        }
        self.map.take();
        self.file.set_len(new_len)?;
        self.map = Some(unsafe { MmapMut::map_mut(&self.file)? });
        Ok(())
    }
}

impl IoBackend for MmapIo {
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let end = offset + buf.len() as u64;
        if end > self.mapped_len() as u64 {
            self.grow(end)?;
        }
        if let Some(map) = self.map.as_mut() {
            map[offset as usize..end as usize].copy_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let map = match self.map.as_ref() {
            Some(map) => map,
            None => return Ok(0),
        };
        if offset >= map.len() as u64 {
            return Ok(0);
        }
        let end = (offset as usize + buf.len()).min(map.len());
        let n = end - offset as usize;
        buf[..n].copy_from_slice(&map[offset as usize..end]);
        Ok(n)
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(map) = self.map.as_ref() {
            map.flush()?;
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        // The mapping must be dropped before the file shrinks beneath it.
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.file.set_len(len)?;
        if len > 0 {
            self.map = Some(unsafe { MmapMut::map_mut(&self.file)? });
        }
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.file.sync_all()?;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.map.take();
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Open the backend selected by `io_type`.
pub fn open_backend(
    io_type: crate::config::IoType,
    path: &Path,
    capacity: u64,
) -> Result<Box<dyn IoBackend>> {
    match io_type {
        crate::config::IoType::FileIo => Ok(Box::new(FileIo::open(path)?)),
        crate::config::IoType::Mmap => Ok(Box::new(MmapIo::open(path, capacity)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn roundtrip(backend: &mut dyn IoBackend) {
        assert_eq!(backend.write_at(b"hello", 0).unwrap(), 5);
        assert_eq!(backend.write_at(b"world", 5).unwrap(), 5);

        let mut buf = [0u8; 10];
        assert_eq!(backend.read_at(&mut buf, 0).unwrap(), 10);
        assert_eq!(&buf, b"helloworld");

        let mut partial = [0u8; 5];
        assert_eq!(backend.read_at(&mut partial, 5).unwrap(), 5);
        assert_eq!(&partial, b"world");

        backend.sync().unwrap();
    }

    #[test]
    fn test_file_io_roundtrip() {
        let dir = tempdir().unwrap();
        let mut io = FileIo::open(&dir.path().join("a.LOG")).unwrap();
        roundtrip(&mut io);
    }

    #[test]
    fn test_mmap_io_roundtrip() {
        let dir = tempdir().unwrap();
        let mut io = MmapIo::open(&dir.path().join("a.LOG"), 4096).unwrap();
        roundtrip(&mut io);
    }

    #[test]
    fn test_file_io_short_read_at_eof() {
        let dir = tempdir().unwrap();
        let mut io = FileIo::open(&dir.path().join("a.LOG")).unwrap();
        io.write_at(b"abc", 0).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(io.read_at(&mut buf, 0).unwrap(), 3);
        assert_eq!(io.read_at(&mut buf, 10).unwrap(), 0);
    }

    #[test]
    fn test_mmap_io_grows_past_capacity() {
        let dir = tempdir().unwrap();
        let mut io = MmapIo::open(&dir.path().join("a.LOG"), 8).unwrap();
        io.write_at(&[7u8; 100], 4).unwrap();

        let mut buf = [0u8; 100];
        assert_eq!(io.read_at(&mut buf, 4).unwrap(), 100);
        assert_eq!(buf, [7u8; 100]);
    }

    #[test]
    fn test_mmap_truncate_then_reuse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.LOG");
        let mut io = MmapIo::open(&path, 4096).unwrap();
        io.write_at(b"keep-this-prefix", 0).unwrap();
        io.truncate(4).unwrap();
        assert_eq!(io.size().unwrap(), 4);

        let mut buf = [0u8; 16];
        assert_eq!(io.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf[..4], b"keep");
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.LOG");
        let mut io = FileIo::open(&path).unwrap();
        io.write_at(b"x", 0).unwrap();
        assert!(path.exists());
        io.delete().unwrap();
        assert!(!path.exists());
    }
}

//! String commands.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::index::StrNode;
use crate::storage::LogEntry;

use super::store::now_nanos;
use super::{check_key, RoseDB};

impl RoseDB {
    /// Set `key` to `value`, replacing any previous value or expiry.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.set_with_expiry(key, value, 0)
    }

    /// Set `key` to `value` with a time-to-live.
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(Error::InvalidArgument("zero ttl".to_string()));
        }
        let expires_at = now_nanos() + ttl.as_nanos() as i64;
        self.set_with_expiry(key, value, expires_at)
    }

    fn set_with_expiry(&self, key: &[u8], value: &[u8], expires_at: i64) -> Result<()> {
        self.core.check_open()?;
        let mut store = self.core.strs.write()?;

        let entry = LogEntry::put(key.to_vec(), value.to_vec(), expires_at);
        let pos = store.files.append_entry(&entry)?;

        let cached = (store.mode == crate::IndexMode::KeyValue).then(|| value.to_vec());
        let node = StrNode {
            pos,
            expires_at,
            value: cached,
        };
        if let Some(prev) = store.index.put(key.to_vec(), node) {
            store.files.discard(prev.pos.fid, prev.pos.size);
        }
        Ok(())
    }

    /// Get the value of `key`. `NotFound` covers both absent and expired.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.core.check_open()?;
        check_key(key)?;

        {
            let store = self.core.strs.read()?;
            match store.index.get(key) {
                None => return Err(Error::NotFound),
                Some(node) if !node.is_expired(now_nanos()) => {
                    if let Some(value) = node.value {
                        return Ok(value);
                    }
                    let entry = store.files.read(node.pos)?;
                    return Ok(entry.value);
                }
                Some(_) => {}
            }
        }

        // Expired: write the tombstone and evict outside the shared lock.
        self.evict_expired(key)?;
        Err(Error::NotFound)
    }

    /// Remove `key`, writing a tombstone. Deleting an absent key is not an
    /// error; the tombstone is written regardless.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.strs.write()?;

        let entry = LogEntry::delete(key.to_vec());
        let pos = store.files.append_entry(&entry)?;
        // The tombstone only matters until its file is merged.
        store.files.discard(pos.fid, pos.size);

        if let Some(prev) = store.index.remove(key) {
            store.files.discard(prev.pos.fid, prev.pos.size);
        }
        Ok(())
    }

    /// Number of live string keys (expired-but-unevicted keys included).
    pub fn str_len(&self) -> Result<usize> {
        self.core.check_open()?;
        Ok(self.core.strs.read()?.index.len())
    }

    /// Re-check under the exclusive lock, then tombstone and evict. A racing
    /// Set wins: it either removed the expiry or reinstalled the key.
    fn evict_expired(&self, key: &[u8]) -> Result<()> {
        let mut store = self.core.strs.write()?;
        let node = match store.index.get(key) {
            Some(node) if node.is_expired(now_nanos()) => node,
            _ => return Ok(()),
        };

        let entry = LogEntry::delete(key.to_vec());
        let pos = store.files.append_entry(&entry)?;
        store.files.discard(pos.fid, pos.size);
        store.files.discard(node.pos.fid, node.pos.size);
        store.index.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexMode, IoType, Options};
    use crate::tmpfs::TempDir;

    fn open_db(dir: &TempDir) -> RoseDB {
        RoseDB::open(Options::new(dir.path())).expect("failed to open db")
    }

    fn open_db_with(dir: &TempDir, io_type: IoType, mode: IndexMode) -> RoseDB {
        let opts = Options::new(dir.path()).io_type(io_type).index_mode(mode);
        RoseDB::open(opts).expect("failed to open db")
    }

    fn set_get_delete(db: &RoseDB) {
        db.set(b"k-1", b"v-1").unwrap();
        db.set(b"k-3", b"v-3").unwrap();
        db.set(b"k-3", b"v-333").unwrap();
        db.delete(b"k-1").unwrap();

        assert_eq!(db.get(b"k-1"), Err(Error::NotFound));
        assert_eq!(db.get(b"k-3").unwrap(), b"v-333");
    }

    #[test]
    fn test_set_get_delete_file_io() {
        let dir = TempDir::new().unwrap();
        let db = open_db_with(&dir, IoType::FileIo, IndexMode::KeyOnly);
        set_get_delete(&db);
    }

    #[test]
    fn test_set_get_delete_mmap() {
        let dir = TempDir::new().unwrap();
        let db = open_db_with(&dir, IoType::Mmap, IndexMode::KeyOnly);
        set_get_delete(&db);
    }

    #[test]
    fn test_set_get_delete_key_value_mode() {
        let dir = TempDir::new().unwrap();
        let db = open_db_with(&dir, IoType::FileIo, IndexMode::KeyValue);
        set_get_delete(&db);
    }

    #[test]
    fn test_empty_key_rules() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        // Writing an empty key is tolerated; reading one is an input error.
        db.set(b"", b"v-1111").unwrap();
        assert!(matches!(db.get(b""), Err(Error::InvalidArgument(_))));
        assert!(matches!(db.delete(b""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        assert_eq!(db.get(b"nope"), Err(Error::NotFound));
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        db.delete(b"never-set").unwrap();
        assert_eq!(db.get(b"never-set"), Err(Error::NotFound));
    }

    #[test]
    fn test_overwrite_keeps_one_index_entry() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.set(b"k", b"v1").unwrap();
        db.set(b"k", b"v2").unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v2");
        assert_eq!(db.str_len().unwrap(), 1);

        // The shadowed v1 entry must be counted as dead bytes in its file.
        let store = db.core.strs.read().unwrap();
        let fid = store.files.active_fid();
        assert!(store.files.discard_bytes(fid) > 0);
    }

    #[test]
    fn test_set_ex_expires() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.set_ex(b"a", b"short", Duration::from_millis(200)).unwrap();
        std::thread::sleep(Duration::from_millis(205));
        assert_eq!(db.get(b"a"), Err(Error::NotFound));

        db.set_ex(b"b", b"long", Duration::from_secs(200)).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(db.get(b"b").unwrap(), b"long");
    }

    #[test]
    fn test_set_ex_overrides_plain_set() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.set(b"k", b"forever").unwrap();
        db.set_ex(b"k", b"brief", Duration::from_millis(200)).unwrap();
        std::thread::sleep(Duration::from_millis(205));
        assert_eq!(db.get(b"k"), Err(Error::NotFound));
    }

    #[test]
    fn test_set_overrides_expiry() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.set_ex(b"k", b"brief", Duration::from_millis(100)).unwrap();
        db.set(b"k", b"forever").unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(db.get(b"k").unwrap(), b"forever");
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        assert!(matches!(
            db.set_ex(b"k", b"v", Duration::ZERO),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_concurrent_writers_distinct_keys() {
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let db = Arc::new(open_db(&dir));

        let mut handles = Vec::new();
        for t in 0..4 {
            let db = Arc::clone(&db);
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("t{t}-key-{i:04}");
                    db.set(key.as_bytes(), key.as_bytes()).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4 {
            for i in 0..200 {
                let key = format!("t{t}-key-{i:04}");
                assert_eq!(db.get(key.as_bytes()).unwrap(), key.as_bytes());
            }
        }
        assert_eq!(db.str_len().unwrap(), 800);
    }

    #[test]
    fn test_closed_database_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        db.set(b"k", b"v").unwrap();
        db.close().unwrap();
        db.close().unwrap(); // idempotent

        assert_eq!(db.set(b"k", b"v2"), Err(Error::Closed));
        assert_eq!(db.get(b"k"), Err(Error::Closed));
        assert_eq!(db.delete(b"k"), Err(Error::Closed));
    }

    #[test]
    fn test_second_open_fails_while_held() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        db.set(b"k", b"v").unwrap();

        match RoseDB::open(Options::new(dir.path())) {
            Err(Error::Io(_)) => {}
            other => panic!("expected Io error for a held directory, got {other:?}"),
        }

        db.close().unwrap();
        let db2 = RoseDB::open(Options::new(dir.path())).unwrap();
        assert_eq!(db2.get(b"k").unwrap(), b"v");
    }
}

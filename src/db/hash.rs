//! Hash commands. Fields are stored as composite log keys; the index keeps
//! field names and positions, values come from the logs.

use crate::error::Result;
use crate::index::encode_sub_key;
use crate::storage::LogEntry;

use super::{check_key, RoseDB};

impl RoseDB {
    /// Set `field` of hash `key`, replacing any previous value.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<()> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.hashes.write()?;

        let entry = LogEntry::put(encode_sub_key(key, field), value.to_vec(), 0);
        let pos = store.files.append_entry(&entry)?;
        if let Some(prev) = store.index.put(key, field.to_vec(), pos) {
            store.files.discard(prev.fid, prev.size);
        }
        Ok(())
    }

    /// Set `field` only when it does not exist yet. Returns whether the
    /// write happened.
    pub fn hset_nx(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.hashes.write()?;

        if store.index.get(key, field).is_some() {
            return Ok(false);
        }
        let entry = LogEntry::put(encode_sub_key(key, field), value.to_vec(), 0);
        let pos = store.files.append_entry(&entry)?;
        store.index.put(key, field.to_vec(), pos);
        Ok(true)
    }

    /// Get `field` of hash `key`; `None` when either is absent.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        self.core.check_open()?;
        check_key(key)?;
        let store = self.core.hashes.read()?;

        match store.index.get(key, field) {
            None => Ok(None),
            Some(pos) => Ok(Some(store.files.read(pos)?.value)),
        }
    }

    /// All `(field, value)` pairs of hash `key`.
    pub fn hget_all(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.core.check_open()?;
        check_key(key)?;
        let store = self.core.hashes.read()?;

        let mut out = Vec::with_capacity(store.index.field_count(key));
        for (field, pos) in store.index.positions(key) {
            out.push((field, store.files.read(pos)?.value));
        }
        Ok(out)
    }

    /// Remove `field` from hash `key`. Returns whether the field existed.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.hashes.write()?;

        if store.index.get(key, field).is_none() {
            return Ok(false);
        }
        let entry = LogEntry::delete(encode_sub_key(key, field));
        let pos = store.files.append_entry(&entry)?;
        store.files.discard(pos.fid, pos.size);
        if let Some(prev) = store.index.remove(key, field) {
            store.files.discard(prev.fid, prev.size);
        }
        Ok(true)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.hashes.read()?.index.get(key, field).is_some())
    }

    pub fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.hashes.read()?.index.fields(key))
    }

    pub fn hvals(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.core.check_open()?;
        check_key(key)?;
        let store = self.core.hashes.read()?;

        let mut out = Vec::with_capacity(store.index.field_count(key));
        for (_, pos) in store.index.positions(key) {
            out.push(store.files.read(pos)?.value);
        }
        Ok(out)
    }

    pub fn hlen(&self, key: &[u8]) -> Result<usize> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.hashes.read()?.index.field_count(key))
    }

    pub fn hkey_exists(&self, key: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.hashes.read()?.index.key_exists(key))
    }

    /// Remove every field of hash `key`, writing one tombstone per field.
    pub fn hclear(&self, key: &[u8]) -> Result<()> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.hashes.write()?;

        for (field, prev) in store.index.positions(key) {
            let entry = LogEntry::delete(encode_sub_key(key, &field));
            let pos = store.files.append_entry(&entry)?;
            store.files.discard(pos.fid, pos.size);
            store.files.discard(prev.fid, prev.size);
        }
        store.index.remove_key(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Options;
    use crate::tmpfs::TempDir;
    use crate::RoseDB;

    fn open_db(dir: &TempDir) -> RoseDB {
        RoseDB::open(Options::new(dir.path())).expect("failed to open db")
    }

    fn seeded(db: &RoseDB) {
        db.hset(b"my_hash", b"a", b"hash_data_001").unwrap();
        db.hset(b"my_hash", b"b", b"hash_data_002").unwrap();
        db.hset(b"my_hash", b"c", b"hash_data_003").unwrap();
    }

    #[test]
    fn test_hset_hget() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        seeded(&db);

        assert_eq!(db.hget(b"my_hash", b"a").unwrap().unwrap(), b"hash_data_001");
        assert_eq!(db.hget(b"my_hash", b"m").unwrap(), None);
        assert_eq!(db.hget(b"other", b"a").unwrap(), None);

        db.hset(b"my_hash", b"a", b"rewritten").unwrap();
        assert_eq!(db.hget(b"my_hash", b"a").unwrap().unwrap(), b"rewritten");
        assert_eq!(db.hlen(b"my_hash").unwrap(), 3);
    }

    #[test]
    fn test_hset_nx() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        seeded(&db);

        assert!(!db.hset_nx(b"my_hash", b"a", b"new one").unwrap());
        assert!(db.hset_nx(b"my_hash", b"f", b"f-value").unwrap());
        assert!(!db.hset_nx(b"my_hash", b"f", b"again").unwrap());
        assert_eq!(db.hget(b"my_hash", b"a").unwrap().unwrap(), b"hash_data_001");
    }

    #[test]
    fn test_hdel() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        seeded(&db);

        assert!(db.hdel(b"my_hash", b"a").unwrap());
        assert!(!db.hdel(b"my_hash", b"a").unwrap());
        assert!(!db.hdel(b"my_hash", b"m").unwrap());
        assert_eq!(db.hget(b"my_hash", b"a").unwrap(), None);
        assert_eq!(db.hlen(b"my_hash").unwrap(), 2);
    }

    #[test]
    fn test_hexists_and_key_exists() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        seeded(&db);

        assert!(db.hexists(b"my_hash", b"a").unwrap());
        assert!(!db.hexists(b"my_hash", b"m").unwrap());
        assert!(!db.hexists(b"missing", b"a").unwrap());
        assert!(db.hkey_exists(b"my_hash").unwrap());
        assert!(!db.hkey_exists(b"missing").unwrap());
    }

    #[test]
    fn test_hkeys_hvals_hget_all() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        seeded(&db);

        let mut keys = db.hkeys(b"my_hash").unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(db.hkeys(b"no").unwrap().is_empty());

        let vals = db.hvals(b"my_hash").unwrap();
        assert_eq!(vals.len(), 3);
        assert!(vals.contains(&b"hash_data_002".to_vec()));

        let mut all = db.hget_all(b"my_hash").unwrap();
        all.sort();
        assert_eq!(all[0], (b"a".to_vec(), b"hash_data_001".to_vec()));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_hclear() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        seeded(&db);

        db.hclear(b"my_hash").unwrap();
        assert_eq!(db.hget(b"my_hash", b"a").unwrap(), None);
        assert_eq!(db.hlen(b"my_hash").unwrap(), 0);
        assert!(!db.hkey_exists(b"my_hash").unwrap());
    }
}

//! Set commands. Members are stored as composite log keys; the index keeps
//! a fingerprint per member, so membership checks never touch disk but
//! listing members reads the logs back.

use crate::error::Result;
use crate::index::{decode_sub_key, encode_sub_key};
use crate::storage::LogEntry;

use super::{check_key, RoseDB};

impl RoseDB {
    /// Add `member` to set `key`. Returns false when it was already there
    /// (no log entry is written in that case).
    pub fn sadd(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.sets.write()?;

        if store.index.contains(key, member) {
            return Ok(false);
        }
        let entry = LogEntry::put(encode_sub_key(key, member), Vec::new(), 0);
        let pos = store.files.append_entry(&entry)?;
        store.index.put(key, member, pos);
        Ok(true)
    }

    /// Remove `member` from set `key`. Returns whether it was present.
    pub fn srem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.sets.write()?;

        let prev = match store.index.get(key, member) {
            None => return Ok(false),
            Some(pos) => pos,
        };
        let entry = LogEntry::delete(encode_sub_key(key, member));
        let pos = store.files.append_entry(&entry)?;
        store.files.discard(pos.fid, pos.size);
        store.files.discard(prev.fid, prev.size);
        store.index.remove(key, member);
        Ok(true)
    }

    pub fn sis_member(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.sets.read()?.index.contains(key, member))
    }

    pub fn scard(&self, key: &[u8]) -> Result<usize> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.sets.read()?.index.card(key))
    }

    /// All members of set `key`, read back from the logs.
    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.core.check_open()?;
        check_key(key)?;
        let store = self.core.sets.read()?;

        let mut out = Vec::with_capacity(store.index.card(key));
        for pos in store.index.positions(key) {
            let entry = store.files.read(pos)?;
            let (_, member) = decode_sub_key(&entry.key)?;
            out.push(member.to_vec());
        }
        Ok(out)
    }
}

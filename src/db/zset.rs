//! Sorted-set commands. The log entry for a member carries its score as the
//! value payload; the index keeps both the member map and the rank order.

use crate::error::Result;
use crate::index::encode_sub_key;
use crate::storage::LogEntry;

use super::store::encode_score;
use super::{check_key, RoseDB};

impl RoseDB {
    /// Add `member` to zset `key` with `score`, or re-score it.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> Result<()> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.zsets.write()?;

        let entry = LogEntry::put(encode_sub_key(key, member), encode_score(score), 0);
        let pos = store.files.append_entry(&entry)?;
        if let Some(prev) = store.index.put(key, member.to_vec(), score, pos) {
            store.files.discard(prev.pos.fid, prev.pos.size);
        }
        Ok(())
    }

    /// Score of `member` in zset `key`, if present.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.zsets.read()?.index.score(key, member))
    }

    pub fn zcard(&self, key: &[u8]) -> Result<usize> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.zsets.read()?.index.card(key))
    }

    /// Members ranked `start..=stop` by ascending score; negative ranks
    /// count from the end.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.zsets.read()?.index.range(key, start, stop))
    }

    /// Remove `member` from zset `key`. Returns whether it was present.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.zsets.write()?;

        let prev = match store.index.node(key, member) {
            None => return Ok(false),
            Some(node) => node,
        };
        let entry = LogEntry::delete(encode_sub_key(key, member));
        let pos = store.files.append_entry(&entry)?;
        store.files.discard(pos.fid, pos.size);
        store.files.discard(prev.pos.fid, prev.pos.size);
        store.index.remove(key, member);
        Ok(true)
    }
}

//! List commands. Elements carry a sequence number in their log key; pops
//! tombstone the element and append a ListMeta record with the new bounds.

use crate::error::{Error, Result};
use crate::index::encode_sub_key;
use crate::index::list::{encode_list_key, encode_list_meta};
use crate::storage::LogEntry;

use super::{check_key, RoseDB};

impl RoseDB {
    /// Push `value` onto the left end of list `key`.
    pub fn lpush(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.push(key, value, true)
    }

    /// Push `value` onto the right end of list `key`.
    pub fn rpush(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.push(key, value, false)
    }

    /// Pop from the left end; `None` when the list is empty or absent.
    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(key, true)
    }

    /// Pop from the right end.
    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(key, false)
    }

    /// Number of elements in list `key`.
    pub fn llen(&self, key: &[u8]) -> Result<u32> {
        self.core.check_open()?;
        check_key(key)?;
        Ok(self.core.lists.read()?.index.element_count(key))
    }

    fn push(&self, key: &[u8], value: &[u8], left: bool) -> Result<()> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.lists.write()?;

        let seq = {
            let rec = store.index.ensure(key);
            if left {
                rec.head
            } else {
                rec.tail
            }
        };
        let entry = LogEntry::put(encode_list_key(key, seq), value.to_vec(), 0);
        let pos = store.files.append_entry(&entry)?;
        // Installing the element at `seq` moves the pushed-on bound outward.
        store.index.put(key, seq, pos);
        Ok(())
    }

    fn pop(&self, key: &[u8], left: bool) -> Result<Option<Vec<u8>>> {
        self.core.check_open()?;
        check_key(key)?;
        let mut store = self.core.lists.write()?;

        let (seq, head, tail) = match store.index.get(key) {
            None => return Ok(None),
            Some(rec) if rec.is_empty() => return Ok(None),
            Some(rec) => {
                if left {
                    (rec.head + 1, rec.head + 1, rec.tail)
                } else {
                    (rec.tail - 1, rec.head, rec.tail - 1)
                }
            }
        };

        let prev = store
            .index
            .get(key)
            .and_then(|rec| rec.seqs.get(&seq).copied())
            .ok_or_else(|| {
                Error::CorruptEntry(format!("list element seq {seq} missing from index"))
            })?;
        let value = store.files.read(prev)?.value;

        let tomb = LogEntry::delete(encode_list_key(key, seq));
        let pos = store.files.append_entry(&tomb)?;
        store.files.discard(pos.fid, pos.size);
        store.files.discard(prev.fid, prev.size);
        store.index.remove(key, seq);

        // Persist the new bounds so replay sees the pop even after the
        // element entries are merged away.
        let meta = LogEntry::list_meta(encode_sub_key(key, &[]), encode_list_meta(head, tail));
        let meta_pos = store.files.append_entry(&meta)?;
        if let Some(old_meta) = store.index.get(key).and_then(|rec| rec.meta_pos) {
            store.files.discard(old_meta.fid, old_meta.size);
        }
        store.index.set_meta(key, head, tail, meta_pos);

        Ok(Some(value))
    }
}

//! Per-type stores.
//!
//! A store pairs one data type's log file set with its in-memory index; the
//! pair lives behind a single reader/writer lock so index state and the
//! active file pointer always move together. Each store knows two things
//! beyond its command surface: how to replay a log entry at startup, and how
//! to decide liveness of (and relocate) an entry during GC.

use byteorder::{ByteOrder, LittleEndian};

use crate::config::IndexMode;
use crate::error::{Error, Result};
use crate::index::list::{decode_list_key, decode_list_meta};
use crate::index::{
    decode_sub_key, HashIndex, ListIndex, SetIndex, StrIndex, StrNode, ZSetIndex,
};
use crate::storage::entry::EntryType;
use crate::storage::{FileSet, LogEntry, ValuePosition};

/// Current wall clock in unix nanoseconds, the unit expiry deadlines use.
pub(crate) fn now_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Behavior shared by all five stores; drives the generic replay and GC
/// scan loops.
pub(crate) trait TypeStore: Send + Sync {
    fn files(&self) -> &FileSet;
    fn files_mut(&mut self) -> &mut FileSet;

    /// Apply one replayed entry: install or evict index state and account
    /// discard bytes, exactly as the original write did.
    fn replay(&mut self, entry: LogEntry, pos: ValuePosition, now: i64) -> Result<()>;

    /// GC: the entry at `old` was scanned from a sealed candidate file.
    /// Rewrite it through the normal append path if it is still live (or is
    /// a tombstone that must outlive older files), updating the index to the
    /// new position. Dead entries are simply left behind.
    fn relocate(&mut self, entry: &LogEntry, old: ValuePosition) -> Result<()>;
}

/// Append a tombstone again when dropping it could resurrect the key: the
/// index no longer holds the key, but some lower-fid file may still hold an
/// older Put that a future replay would see without this record.
fn carry_tombstone<F>(files: &mut FileSet, entry: &LogEntry, old: ValuePosition, absent: F) -> Result<()>
where
    F: FnOnce() -> bool,
{
    if absent() && files.has_archived_below(old.fid) {
        let new_pos = files.append_entry(entry)?;
        // The carried tombstone is itself dead weight in its new file.
        files.discard(new_pos.fid, new_pos.size);
    }
    Ok(())
}

// ---------------------------------------------------------------- strings

pub(crate) struct StrStore {
    pub files: FileSet,
    pub index: StrIndex,
    pub mode: IndexMode,
}

impl TypeStore for StrStore {
    fn files(&self) -> &FileSet {
        &self.files
    }

    fn files_mut(&mut self) -> &mut FileSet {
        &mut self.files
    }

    fn replay(&mut self, entry: LogEntry, pos: ValuePosition, now: i64) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                // An entry that expired before this open is as good as
                // deleted; it must also shadow any earlier Put.
                if entry.expires_at != 0 && entry.expires_at <= now {
                    self.files.discard(pos.fid, pos.size);
                    if let Some(prev) = self.index.remove(&entry.key) {
                        self.files.discard(prev.pos.fid, prev.pos.size);
                    }
                    return Ok(());
                }
                let value = (self.mode == IndexMode::KeyValue).then(|| entry.value);
                let node = StrNode {
                    pos,
                    expires_at: entry.expires_at,
                    value,
                };
                if let Some(prev) = self.index.put(entry.key, node) {
                    self.files.discard(prev.pos.fid, prev.pos.size);
                }
            }
            EntryType::Delete => {
                self.files.discard(pos.fid, pos.size);
                if let Some(prev) = self.index.remove(&entry.key) {
                    self.files.discard(prev.pos.fid, prev.pos.size);
                }
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }

    fn relocate(&mut self, entry: &LogEntry, old: ValuePosition) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let node = match self.index.get(&entry.key) {
                    Some(node) if node.pos == old => node,
                    _ => return Ok(()),
                };
                if node.is_expired(now_nanos()) {
                    // Evict instead of rewriting, but leave a tombstone: an
                    // older un-expired Put for this key may survive in a
                    // lower file and must not win the next replay.
                    let tomb = LogEntry::delete(entry.key.clone());
                    let pos = self.files.append_entry(&tomb)?;
                    self.files.discard(pos.fid, pos.size);
                    self.index.remove(&entry.key);
                    return Ok(());
                }
                let new_pos = self.files.append_entry(entry)?;
                self.index.put(
                    entry.key.clone(),
                    StrNode {
                        pos: new_pos,
                        expires_at: node.expires_at,
                        value: node.value,
                    },
                );
            }
            EntryType::Delete => {
                carry_tombstone(&mut self.files, entry, old, || {
                    self.index.get(&entry.key).is_none()
                })?;
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }
}

// ----------------------------------------------------------------- hashes

pub(crate) struct HashStore {
    pub files: FileSet,
    pub index: HashIndex,
}

impl TypeStore for HashStore {
    fn files(&self) -> &FileSet {
        &self.files
    }

    fn files_mut(&mut self) -> &mut FileSet {
        &mut self.files
    }

    fn replay(&mut self, entry: LogEntry, pos: ValuePosition, _now: i64) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, field) = decode_sub_key(&entry.key)?;
                let (key, field) = (key.to_vec(), field.to_vec());
                if let Some(prev) = self.index.put(&key, field, pos) {
                    self.files.discard(prev.fid, prev.size);
                }
            }
            EntryType::Delete => {
                self.files.discard(pos.fid, pos.size);
                let (key, field) = decode_sub_key(&entry.key)?;
                if let Some(prev) = self.index.remove(key, field) {
                    self.files.discard(prev.fid, prev.size);
                }
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }

    fn relocate(&mut self, entry: &LogEntry, old: ValuePosition) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, field) = decode_sub_key(&entry.key)?;
                if self.index.get(key, field) != Some(old) {
                    return Ok(());
                }
                let (key, field) = (key.to_vec(), field.to_vec());
                let new_pos = self.files.append_entry(entry)?;
                self.index.put(&key, field, new_pos);
            }
            EntryType::Delete => {
                let (key, field) = decode_sub_key(&entry.key)?;
                carry_tombstone(&mut self.files, entry, old, || {
                    self.index.get(key, field).is_none()
                })?;
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }
}

// ------------------------------------------------------------------ lists

pub(crate) struct ListStore {
    pub files: FileSet,
    pub index: ListIndex,
}

impl TypeStore for ListStore {
    fn files(&self) -> &FileSet {
        &self.files
    }

    fn files_mut(&mut self) -> &mut FileSet {
        &mut self.files
    }

    fn replay(&mut self, entry: LogEntry, pos: ValuePosition, _now: i64) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, seq) = decode_list_key(&entry.key)?;
                let key = key.to_vec();
                if let Some(prev) = self.index.put(&key, seq, pos) {
                    self.files.discard(prev.fid, prev.size);
                }
            }
            EntryType::Delete => {
                self.files.discard(pos.fid, pos.size);
                let (key, seq) = decode_list_key(&entry.key)?;
                if let Some(prev) = self.index.remove(key, seq) {
                    self.files.discard(prev.fid, prev.size);
                }
            }
            EntryType::ListMeta => {
                let (key, _) = decode_sub_key(&entry.key)?;
                let (head, tail) = decode_list_meta(&entry.value)?;
                let key = key.to_vec();
                if let Some(prev) = self.index.get(&key).and_then(|rec| rec.meta_pos) {
                    self.files.discard(prev.fid, prev.size);
                }
                self.index.set_meta(&key, head, tail, pos);
            }
        }
        Ok(())
    }

    fn relocate(&mut self, entry: &LogEntry, old: ValuePosition) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, seq) = decode_list_key(&entry.key)?;
                let live = self
                    .index
                    .get(key)
                    .and_then(|rec| rec.seqs.get(&seq).copied())
                    == Some(old);
                if !live {
                    return Ok(());
                }
                let key = key.to_vec();
                let new_pos = self.files.append_entry(entry)?;
                self.index.put(&key, seq, new_pos);
            }
            EntryType::Delete => {
                let (key, seq) = decode_list_key(&entry.key)?;
                carry_tombstone(&mut self.files, entry, old, || {
                    self.index
                        .get(key)
                        .map_or(true, |rec| !rec.seqs.contains_key(&seq))
                })?;
            }
            EntryType::ListMeta => {
                let (key, _) = decode_sub_key(&entry.key)?;
                let (head, tail) = match self.index.get(key) {
                    Some(rec) if rec.meta_pos == Some(old) => (rec.head, rec.tail),
                    _ => return Ok(()),
                };
                let key = key.to_vec();
                let new_pos = self.files.append_entry(entry)?;
                self.index.set_meta(&key, head, tail, new_pos);
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------- sets

pub(crate) struct SetStore {
    pub files: FileSet,
    pub index: SetIndex,
}

impl TypeStore for SetStore {
    fn files(&self) -> &FileSet {
        &self.files
    }

    fn files_mut(&mut self) -> &mut FileSet {
        &mut self.files
    }

    fn replay(&mut self, entry: LogEntry, pos: ValuePosition, _now: i64) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, member) = decode_sub_key(&entry.key)?;
                let (key, member) = (key.to_vec(), member.to_vec());
                if let Some(prev) = self.index.put(&key, &member, pos) {
                    self.files.discard(prev.fid, prev.size);
                }
            }
            EntryType::Delete => {
                self.files.discard(pos.fid, pos.size);
                let (key, member) = decode_sub_key(&entry.key)?;
                let (key, member) = (key.to_vec(), member.to_vec());
                if let Some(prev) = self.index.remove(&key, &member) {
                    self.files.discard(prev.fid, prev.size);
                }
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }

    fn relocate(&mut self, entry: &LogEntry, old: ValuePosition) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, member) = decode_sub_key(&entry.key)?;
                if self.index.get(key, member) != Some(old) {
                    return Ok(());
                }
                let (key, member) = (key.to_vec(), member.to_vec());
                let new_pos = self.files.append_entry(entry)?;
                self.index.put(&key, &member, new_pos);
            }
            EntryType::Delete => {
                let (key, member) = decode_sub_key(&entry.key)?;
                carry_tombstone(&mut self.files, entry, old, || {
                    !self.index.contains(key, member)
                })?;
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }
}

// ------------------------------------------------------------ sorted sets

pub(crate) struct ZSetStore {
    pub files: FileSet,
    pub index: ZSetIndex,
}

/// ZSet entry values carry the score as 8 little-endian bytes.
pub(crate) fn decode_score(value: &[u8]) -> Result<f64> {
    if value.len() != 8 {
        return Err(Error::CorruptEntry(
            "zset payload must be an 8-byte score".to_string(),
        ));
    }
    Ok(LittleEndian::read_f64(value))
}

pub(crate) fn encode_score(score: f64) -> Vec<u8> {
    let mut buf = [0u8; 8];
    LittleEndian::write_f64(&mut buf, score);
    buf.to_vec()
}

impl TypeStore for ZSetStore {
    fn files(&self) -> &FileSet {
        &self.files
    }

    fn files_mut(&mut self) -> &mut FileSet {
        &mut self.files
    }

    fn replay(&mut self, entry: LogEntry, pos: ValuePosition, _now: i64) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, member) = decode_sub_key(&entry.key)?;
                let score = decode_score(&entry.value)?;
                let (key, member) = (key.to_vec(), member.to_vec());
                if let Some(prev) = self.index.put(&key, member, score, pos) {
                    self.files.discard(prev.pos.fid, prev.pos.size);
                }
            }
            EntryType::Delete => {
                self.files.discard(pos.fid, pos.size);
                let (key, member) = decode_sub_key(&entry.key)?;
                let (key, member) = (key.to_vec(), member.to_vec());
                if let Some(prev) = self.index.remove(&key, &member) {
                    self.files.discard(prev.pos.fid, prev.pos.size);
                }
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }

    fn relocate(&mut self, entry: &LogEntry, old: ValuePosition) -> Result<()> {
        match entry.entry_type {
            EntryType::Put => {
                let (key, member) = decode_sub_key(&entry.key)?;
                let node = match self.index.node(key, member) {
                    Some(node) if node.pos == old => node,
                    _ => return Ok(()),
                };
                let (key, member) = (key.to_vec(), member.to_vec());
                let new_pos = self.files.append_entry(entry)?;
                self.index.put(&key, member, node.score, new_pos);
            }
            EntryType::Delete => {
                let (key, member) = decode_sub_key(&entry.key)?;
                carry_tombstone(&mut self.files, entry, old, || {
                    self.index.node(key, member).is_none()
                })?;
            }
            EntryType::ListMeta => {}
        }
        Ok(())
    }
}

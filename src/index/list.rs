//! List index: per-list head/tail sequence counters over a sorted map of
//! element positions. No pointer graph; the sequence numbers provide order.
//!
//! Elements occupy the open interval `(head, tail)`: an empty list has
//! `tail == head + 1`, a left push writes at `head` and then moves `head`
//! down, a right push writes at `tail` and moves it up. Pops advance the
//! respective bound and append a ListMeta record so the bounds survive
//! replay even when the popped element's entries are gone.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::storage::ValuePosition;

/// Midpoint start so both directions have room.
pub const SEQ_INIT: u32 = u32::MAX / 2;

/// Log key of a list element: the composite key with the sequence number as
/// a fixed 4-byte suffix.
pub fn encode_list_key(key: &[u8], seq: u32) -> Vec<u8> {
    super::encode_sub_key(key, &seq.to_le_bytes())
}

/// Split a list element log key back into `(key, seq)`.
pub fn decode_list_key(buf: &[u8]) -> Result<(&[u8], u32)> {
    let (key, suffix) = super::decode_sub_key(buf)?;
    let seq: [u8; 4] = suffix
        .try_into()
        .map_err(|_| Error::CorruptEntry("list key without a 4-byte sequence".to_string()))?;
    Ok((key, u32::from_le_bytes(seq)))
}

/// Value payload of a ListMeta record: the head and tail bounds.
pub fn encode_list_meta(head: u32, tail: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&head.to_le_bytes());
    buf.extend_from_slice(&tail.to_le_bytes());
    buf
}

pub fn decode_list_meta(buf: &[u8]) -> Result<(u32, u32)> {
    if buf.len() != 8 {
        return Err(Error::CorruptEntry("list meta payload must be 8 bytes".to_string()));
    }
    let head = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let tail = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok((head, tail))
}

#[derive(Debug, Clone)]
pub struct ListRec {
    pub head: u32,
    pub tail: u32,
    pub seqs: BTreeMap<u32, ValuePosition>,
    /// Position of the latest ListMeta record for this list, if any.
    pub meta_pos: Option<ValuePosition>,
}

impl Default for ListRec {
    fn default() -> Self {
        Self {
            head: SEQ_INIT,
            tail: SEQ_INIT + 1,
            seqs: BTreeMap::new(),
            meta_pos: None,
        }
    }
}

impl ListRec {
    pub fn element_count(&self) -> u32 {
        self.tail - self.head - 1
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.head + 1
    }
}

#[derive(Default)]
pub struct ListIndex {
    map: HashMap<Vec<u8>, ListRec>,
}

impl ListIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&ListRec> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut ListRec> {
        self.map.get_mut(key)
    }

    pub fn ensure(&mut self, key: &[u8]) -> &mut ListRec {
        self.map.entry(key.to_vec()).or_default()
    }

    /// Install an element position, widening the bounds to cover `seq`.
    /// Returns the position it replaced, if the seq was already present.
    pub fn put(&mut self, key: &[u8], seq: u32, pos: ValuePosition) -> Option<ValuePosition> {
        let rec = self.ensure(key);
        if rec.is_empty() && rec.seqs.is_empty() {
            rec.head = seq - 1;
            rec.tail = seq + 1;
        } else {
            rec.head = rec.head.min(seq - 1);
            rec.tail = rec.tail.max(seq + 1);
        }
        rec.seqs.insert(seq, pos)
    }

    /// Drop an element position. Bounds are left alone; the ListMeta record
    /// that accompanies every pop carries the new bounds.
    pub fn remove(&mut self, key: &[u8], seq: u32) -> Option<ValuePosition> {
        self.map.get_mut(key)?.seqs.remove(&seq)
    }

    pub fn set_meta(&mut self, key: &[u8], head: u32, tail: u32, pos: ValuePosition) {
        let rec = self.ensure(key);
        rec.head = head;
        rec.tail = tail;
        rec.meta_pos = Some(pos);
    }

    pub fn element_count(&self, key: &[u8]) -> u32 {
        self.map.get(key).map_or(0, |rec| rec.element_count())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ListRec)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

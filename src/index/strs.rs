//! String index: an ordered map from key to the latest Put position.
//!
//! Backed by a concurrent skip list for cheap ordered iteration (the scan
//! iterator walks it with prefix and direction filters) and clone-out reads.

use std::ops::Bound;

use crossbeam_skiplist::SkipMap;

use crate::storage::ValuePosition;

/// What the index remembers about one key.
#[derive(Debug, Clone, PartialEq)]
pub struct StrNode {
    pub pos: ValuePosition,
    /// Unix nanoseconds; 0 means no expiry.
    pub expires_at: i64,
    /// Populated only in key+value mode.
    pub value: Option<Vec<u8>>,
}

impl StrNode {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }
}

pub struct StrIndex {
    map: SkipMap<Vec<u8>, StrNode>,
}

impl Default for StrIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl StrIndex {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<StrNode> {
        self.map.get(key).map(|e| e.value().clone())
    }

    /// Install a node, returning what it replaced.
    pub fn put(&self, key: Vec<u8>, node: StrNode) -> Option<StrNode> {
        let prev = self.get(&key);
        self.map.insert(key, node);
        prev
    }

    pub fn remove(&self, key: &[u8]) -> Option<StrNode> {
        self.map.remove(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot the keys (and nodes) of a prefix range, in order. `reverse`
    /// walks from the high end; `limit` of 0 means unbounded.
    pub fn scan(&self, prefix: &[u8], limit: usize, reverse: bool) -> Vec<(Vec<u8>, StrNode)> {
        let range = match prefix_end(prefix) {
            Some(end) => self
                .map
                .range((Bound::Included(prefix.to_vec()), Bound::Excluded(end))),
            None => self
                .map
                .range((Bound::Included(prefix.to_vec()), Bound::Unbounded)),
        };

        let mut out = Vec::new();
        if reverse {
            for entry in range.rev() {
                out.push((entry.key().clone(), entry.value().clone()));
                if limit != 0 && out.len() == limit {
                    break;
                }
            }
        } else {
            for entry in range {
                out.push((entry.key().clone(), entry.value().clone()));
                if limit != 0 && out.len() == limit {
                    break;
                }
            }
        }
        out
    }
}

/// Smallest byte string greater than every string with `prefix`, or None
/// when the prefix is empty or all-0xff.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

//! Ordered scan over string keys.
//!
//! The iterator snapshots the matching keys (and their index nodes) under
//! the shared lock, then fetches values lazily as the caller advances, so a
//! long scan never pins the lock. Keys that expire or are deleted between
//! the snapshot and the fetch are skipped.

use crate::error::Result;
use crate::index::StrNode;

use super::store::now_nanos;
use super::RoseDB;

/// Options for [`RoseDB::iter`].
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Only keys starting with this prefix; empty means every key.
    pub prefix: Vec<u8>,
    /// Stop after this many keys; 0 means unbounded.
    pub limit: usize,
    /// Walk from the highest key down.
    pub reverse: bool,
}

pub struct Iter<'a> {
    db: &'a RoseDB,
    entries: std::vec::IntoIter<(Vec<u8>, StrNode)>,
}

impl RoseDB {
    /// Ordered scan of string keys.
    pub fn iter(&self, opts: IterOptions) -> Result<Iter<'_>> {
        self.core.check_open()?;
        let entries = {
            let store = self.core.strs.read()?;
            store.index.scan(&opts.prefix, opts.limit, opts.reverse)
        };
        Ok(Iter {
            db: self,
            entries: entries.into_iter(),
        })
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, node) = self.entries.next()?;
            if node.is_expired(now_nanos()) {
                continue;
            }
            if let Some(value) = node.value {
                return Some(Ok((key, value)));
            }
            let read = {
                let store = match self.db.core.strs.read() {
                    Ok(store) => store,
                    Err(e) => return Some(Err(e.into())),
                };
                // Re-check: the key may have moved or vanished since the
                // snapshot.
                match store.index.get(&key) {
                    None => continue,
                    Some(current) => store.files.read(current.pos),
                }
            };
            return match read {
                Ok(entry) => Some(Ok((key, entry.value))),
                Err(e) => Some(Err(e)),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::tmpfs::TempDir;

    fn open_db(dir: &TempDir) -> RoseDB {
        RoseDB::open(Options::new(dir.path())).expect("failed to open db")
    }

    #[test]
    fn test_iter_is_ordered() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        for i in [3, 1, 4, 1, 5, 9, 2, 6] {
            db.set(format!("key-{i}").as_bytes(), format!("val-{i}").as_bytes())
                .unwrap();
        }

        let items: Result<Vec<_>> = db.iter(IterOptions::default()).unwrap().collect();
        let items = items.unwrap();
        assert_eq!(items.len(), 7);
        let keys: Vec<_> = items.iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(items[0], (b"key-1".to_vec(), b"val-1".to_vec()));
    }

    #[test]
    fn test_iter_prefix_and_limit() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        for k in ["a-1", "a-2", "a-3", "b-1", "b-2"] {
            db.set(k.as_bytes(), b"v").unwrap();
        }

        let opts = IterOptions {
            prefix: b"a-".to_vec(),
            limit: 2,
            reverse: false,
        };
        let items: Result<Vec<_>> = db.iter(opts).unwrap().collect();
        let keys: Vec<_> = items.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a-1".to_vec(), b"a-2".to_vec()]);
    }

    #[test]
    fn test_iter_reverse() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        for k in ["k-1", "k-2", "k-3"] {
            db.set(k.as_bytes(), b"v").unwrap();
        }

        let opts = IterOptions {
            reverse: true,
            ..Default::default()
        };
        let items: Result<Vec<_>> = db.iter(opts).unwrap().collect();
        let keys: Vec<_> = items.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"k-3".to_vec(), b"k-2".to_vec(), b"k-1".to_vec()]);
    }

    #[test]
    fn test_iter_skips_keys_deleted_mid_scan() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.set(b"k-1", b"v").unwrap();
        db.set(b"k-2", b"v").unwrap();

        let mut iter = db.iter(IterOptions::default()).unwrap();
        let first = iter.next().unwrap().unwrap();
        assert_eq!(first.0, b"k-1");

        db.delete(b"k-2").unwrap();
        assert!(iter.next().is_none());
    }
}

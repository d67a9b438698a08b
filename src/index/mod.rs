//! In-memory indexes, one per data type, rebuilt from the logs at startup.
//!
//! Every element tracks the exact `ValuePosition` of its latest Put entry;
//! GC decides liveness by comparing positions, so the indexes are the single
//! source of truth for which log bytes are still meaningful.

pub mod hash;
pub mod list;
pub mod set;
pub mod strs;
pub mod zset;

pub use hash::HashIndex;
pub use list::{ListIndex, ListRec};
pub use set::SetIndex;
pub use strs::{StrIndex, StrNode};
pub use zset::ZSetIndex;

use crate::error::{Error, Result};
use crate::storage::entry::{get_uvarint, put_uvarint, uvarint_len};

/// Encode the log key of a sub-keyed element (hash field, set member, zset
/// member, list element): `[key_len:uvarint][key][suffix]`.
pub fn encode_sub_key(key: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(uvarint_len(key.len() as u64) + key.len() + suffix.len());
    put_uvarint(&mut buf, key.len() as u64);
    buf.extend_from_slice(key);
    buf.extend_from_slice(suffix);
    buf
}

/// Split a composite log key back into `(key, suffix)`.
pub fn decode_sub_key(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let (key_len, n) = get_uvarint(buf)?;
    let key_len = key_len as usize;
    if buf.len() < n + key_len {
        return Err(Error::CorruptEntry("composite key shorter than its own length prefix".to_string()));
    }
    Ok((&buf[n..n + key_len], &buf[n + key_len..]))
}

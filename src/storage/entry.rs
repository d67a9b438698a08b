//! Log entry codec.
//!
//! Each entry is encoded as a variable-length header, the key and value
//! bytes, and a trailing checksum:
//!
//! ```text
//! +---------+-----------------+-----------------+-------------------+-----+-------+-----------+
//! | type:u8 | key_len:uvarint | val_len:uvarint | expires_at:ivarint| key | value | crc32:u32 |
//! +---------+-----------------+-----------------+-------------------+-----+-------+-----------+
//! ```
//!
//! The CRC32 (IEEE) covers header, key and value, and is stored
//! little-endian. Empty keys and empty values are legal. Decoding fails with
//! `Truncated` when the buffer ends before a complete entry, and with
//! `CorruptEntry` on a checksum mismatch or a malformed header.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Worst-case header length: type byte, two u64 uvarints, one i64 ivarint.
pub const MAX_HEADER_SIZE: usize = 1 + 10 + 10 + 10;

const CRC_SIZE: usize = 4;

/// Kind of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A key/value write.
    Put = 0,
    /// A tombstone; the value is empty.
    Delete = 1,
    /// List head/tail bookkeeping record.
    ListMeta = 2,
}

impl EntryType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(EntryType::Put),
            1 => Some(EntryType::Delete),
            2 => Some(EntryType::ListMeta),
            _ => None,
        }
    }
}

/// A single record in a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub entry_type: EntryType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Expiry deadline in unix nanoseconds; 0 means no expiry.
    pub expires_at: i64,
}

impl LogEntry {
    pub fn put(key: Vec<u8>, value: Vec<u8>, expires_at: i64) -> Self {
        Self {
            entry_type: EntryType::Put,
            key,
            value,
            expires_at,
        }
    }

    pub fn delete(key: Vec<u8>) -> Self {
        Self {
            entry_type: EntryType::Delete,
            key,
            value: Vec::new(),
            expires_at: 0,
        }
    }

    pub fn list_meta(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            entry_type: EntryType::ListMeta,
            key,
            value,
            expires_at: 0,
        }
    }

    /// Encoded size in bytes, without encoding.
    pub fn encoded_len(&self) -> usize {
        1 + uvarint_len(self.key.len() as u64)
            + uvarint_len(self.value.len() as u64)
            + uvarint_len(zigzag(self.expires_at))
            + self.key.len()
            + self.value.len()
            + CRC_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.entry_type as u8);
        put_uvarint(&mut buf, self.key.len() as u64);
        put_uvarint(&mut buf, self.value.len() as u64);
        put_uvarint(&mut buf, zigzag(self.expires_at));
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        let crc = CRC32.checksum(&buf);
        let mut trailer = [0u8; CRC_SIZE];
        LittleEndian::write_u32(&mut trailer, crc);
        buf.extend_from_slice(&trailer);
        buf
    }

    /// Decode one entry from the front of `buf`, returning it together with
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(LogEntry, usize)> {
        let header = EntryHeader::decode(buf)?;
        let EntryHeader {
            entry_type,
            key_len,
            expires_at,
            header_len: at,
            ..
        } = header;

        let total = header.total_len();
        if buf.len() < total {
            return Err(Error::Truncated);
        }

        let body_end = total - CRC_SIZE;
        let stored = LittleEndian::read_u32(&buf[body_end..total]);
        let computed = CRC32.checksum(&buf[..body_end]);
        if stored != computed {
            return Err(Error::CorruptEntry(format!(
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        let key = buf[at..at + key_len].to_vec();
        let value = buf[at + key_len..body_end].to_vec();
        Ok((
            LogEntry {
                entry_type,
                key,
                value,
                expires_at,
            },
            total,
        ))
    }
}

/// Decoded entry header. Used on the replay path, where the entry's total
/// size is not known until the header has been read.
#[derive(Debug, Clone, Copy)]
pub struct EntryHeader {
    pub entry_type: EntryType,
    pub key_len: usize,
    pub val_len: usize,
    pub expires_at: i64,
    pub header_len: usize,
}

impl EntryHeader {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(Error::Truncated);
        }
        let entry_type = EntryType::from_u8(buf[0])
            .ok_or_else(|| Error::CorruptEntry(format!("unknown entry type {}", buf[0])))?;

        let mut at = 1;
        let (key_len, n) = get_uvarint(&buf[at..])?;
        at += n;
        let (val_len, n) = get_uvarint(&buf[at..])?;
        at += n;
        let (raw_expire, n) = get_uvarint(&buf[at..])?;
        at += n;

        Ok(Self {
            entry_type,
            key_len: key_len as usize,
            val_len: val_len as usize,
            expires_at: unzigzag(raw_expire),
            header_len: at,
        })
    }

    /// Full entry size: header, key, value and checksum trailer.
    pub fn total_len(&self) -> usize {
        self.header_len + self.key_len + self.val_len + CRC_SIZE
    }
}

pub(crate) fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push(v as u8 | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub(crate) fn get_uvarint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut x = 0u64;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == 10 || (i == 9 && b > 1) {
            return Err(Error::CorruptEntry("uvarint overflows u64".to_string()));
        }
        if b < 0x80 {
            return Ok((x | (u64::from(b) << shift), i + 1));
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    Err(Error::Truncated)
}

pub(crate) fn uvarint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

//! Index snapshots for the non-string types.
//!
//! A dump lets `open` skip replaying everything below its fid watermark:
//! the snapshot captures the whole index (keys, per-type bookkeeping and
//! log positions), and only files above the watermark are replayed on top.
//! The log files below the watermark stay on disk, since in key-only
//! storage they still hold the values; GC remains the only thing that
//! deletes them.
//!
//! File format: magic `RDMP`, type tag u8, count u32, `count ×`
//! (uvarint-length-prefixed key + a per-type blob), fid watermark u32, then
//! a crc32 over all preceding bytes. The file is written to a temp name,
//! fsynced and renamed into place; a snapshot that fails validation is
//! ignored and full replay runs instead. Strings are never dumped; their
//! index is compact and cheap to rebuild.

use std::fs::{self, File};
use std::io::Write;
use std::sync::RwLock;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::storage::entry::{get_uvarint, put_uvarint, CRC32};
use crate::storage::{DataType, ValuePosition};

use super::store::{HashStore, ListStore, SetStore, ZSetStore};
use super::{Core, TypeStore};

const DUMP_MAGIC: &[u8; 4] = b"RDMP";
const DUMP_SUFFIX: &str = ".DUMP";

/// Magic + tag + count + watermark + crc.
const MIN_DUMP_LEN: usize = 4 + 1 + 4 + 4 + 4;

/// Snapshot every non-string index.
pub(crate) fn run(core: &Core) -> Result<()> {
    dump_type(core, &core.hashes)?;
    dump_type(core, &core.lists)?;
    dump_type(core, &core.sets)?;
    dump_type(core, &core.zsets)?;
    Ok(())
}

fn dump_type<S: DumpStore>(core: &Core, shard: &RwLock<S>) -> Result<()> {
    if core.is_closed() {
        return Ok(());
    }

    // Seal the active file so the watermark covers everything written so
    // far; later appends land above it and get replayed on top of the dump.
    let (data_type, watermark) = {
        let mut store = shard.write()?;
        let data_type = store.files().data_type();
        if store.files().active_len() > 0 {
            store.files_mut().rotate()?;
        }
        match store.files().max_archived_fid() {
            // Nothing written yet; nothing worth snapshotting.
            None => return Ok(()),
            Some(watermark) => (data_type, watermark),
        }
    };

    let body = {
        let store = shard.read()?;
        let mut buf = Vec::new();
        buf.extend_from_slice(DUMP_MAGIC);
        buf.push(data_type.tag());
        put_u32(&mut buf, store.index_len() as u32);
        store.write_entries(&mut buf);
        put_u32(&mut buf, watermark);
        let crc = CRC32.checksum(&buf);
        put_u32(&mut buf, crc);
        buf
    };

    let path = core
        .opts
        .db_path
        .join(format!("{}{}", data_type.name(), DUMP_SUFFIX));
    let tmp = core
        .opts
        .db_path
        .join(format!("{}{}.tmp", data_type.name(), DUMP_SUFFIX));
    let mut file = File::create(&tmp)?;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &path)?;

    tracing::info!(
        data_type = %data_type,
        watermark,
        bytes = body.len(),
        "dumped index snapshot"
    );
    Ok(())
}

/// Load the type's snapshot into `store`, returning its watermark. A
/// missing or invalid snapshot returns `None` (with the index left empty)
/// and the caller replays the full series.
pub(crate) fn load<S: DumpStore>(core: &Core, store: &mut S) -> Result<Option<u32>> {
    let data_type = store.files().data_type();
    let path = core
        .opts
        .db_path
        .join(format!("{}{}", data_type.name(), DUMP_SUFFIX));

    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match parse(store, &bytes, data_type) {
        Ok(watermark) => {
            tracing::info!(data_type = %data_type, watermark, "loaded index snapshot");
            Ok(Some(watermark))
        }
        Err(e) => {
            tracing::warn!(
                data_type = %data_type,
                error = %e,
                "invalid index snapshot, falling back to full replay"
            );
            store.clear_index();
            Ok(None)
        }
    }
}

fn parse<S: DumpStore>(store: &mut S, bytes: &[u8], data_type: DataType) -> Result<u32> {
    if bytes.len() < MIN_DUMP_LEN {
        return Err(Error::CorruptEntry("dump too short".to_string()));
    }
    let body_end = bytes.len() - 4;
    let stored = LittleEndian::read_u32(&bytes[body_end..]);
    let computed = CRC32.checksum(&bytes[..body_end]);
    if stored != computed {
        return Err(Error::CorruptEntry("dump checksum mismatch".to_string()));
    }
    if &bytes[..4] != DUMP_MAGIC {
        return Err(Error::CorruptEntry("bad dump magic".to_string()));
    }
    if bytes[4] != data_type.tag() {
        return Err(Error::CorruptEntry(format!(
            "dump type tag {} does not match {}",
            bytes[4], data_type
        )));
    }

    let count = LittleEndian::read_u32(&bytes[5..9]);
    let watermark = LittleEndian::read_u32(&bytes[body_end - 4..body_end]);

    let mut reader = Reader::new(&bytes[9..body_end - 4]);
    for _ in 0..count {
        let key_len = reader.uvarint()? as usize;
        let key = reader.take(key_len)?.to_vec();
        store.read_entry(key, &mut reader)?;
    }
    if reader.remaining() != 0 {
        return Err(Error::CorruptEntry("trailing bytes in dump".to_string()));
    }
    Ok(watermark)
}

/// Per-type snapshot serialization, on top of the common framing.
pub(crate) trait DumpStore: TypeStore {
    /// Number of outer keys the snapshot will contain.
    fn index_len(&self) -> usize;

    /// Append every `(key, blob)` entry to `buf`.
    fn write_entries(&self, buf: &mut Vec<u8>);

    /// Parse one key's blob and install it.
    fn read_entry(&mut self, key: Vec<u8>, reader: &mut Reader) -> Result<()>;

    /// Throw away whatever a partial parse installed.
    fn clear_index(&mut self);
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.at
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::CorruptEntry("dump entry truncated".to_string()));
        }
        let slice = &self.buf[self.at..self.at + n];
        self.at += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    fn uvarint(&mut self) -> Result<u64> {
        let (v, n) = get_uvarint(&self.buf[self.at..])?;
        self.at += n;
        Ok(v)
    }

    fn pos(&mut self) -> Result<ValuePosition> {
        let fid = self.u32()?;
        let offset = self.u64()?;
        let size = self.u32()?;
        Ok(ValuePosition::new(fid, offset, size))
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_pos(buf: &mut Vec<u8>, pos: ValuePosition) {
    put_u32(buf, pos.fid);
    put_u64(buf, pos.offset);
    put_u32(buf, pos.size);
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

impl DumpStore for HashStore {
    fn index_len(&self) -> usize {
        self.index.len()
    }

    fn write_entries(&self, buf: &mut Vec<u8>) {
        for (key, fields) in self.index.iter() {
            put_bytes(buf, key);
            put_u32(buf, fields.len() as u32);
            for (field, pos) in fields {
                put_bytes(buf, field);
                put_pos(buf, *pos);
            }
        }
    }

    fn read_entry(&mut self, key: Vec<u8>, reader: &mut Reader) -> Result<()> {
        let fields = reader.u32()?;
        for _ in 0..fields {
            let len = reader.uvarint()? as usize;
            let field = reader.take(len)?.to_vec();
            let pos = reader.pos()?;
            self.index.put(&key, field, pos);
        }
        Ok(())
    }

    fn clear_index(&mut self) {
        self.index = crate::index::HashIndex::new();
    }
}

impl DumpStore for ListStore {
    fn index_len(&self) -> usize {
        self.index.len()
    }

    fn write_entries(&self, buf: &mut Vec<u8>) {
        for (key, rec) in self.index.iter() {
            put_bytes(buf, key);
            put_u32(buf, rec.head);
            put_u32(buf, rec.tail);
            match rec.meta_pos {
                Some(pos) => {
                    buf.push(1);
                    put_pos(buf, pos);
                }
                None => buf.push(0),
            }
            put_u32(buf, rec.seqs.len() as u32);
            for (seq, pos) in &rec.seqs {
                put_u32(buf, *seq);
                put_pos(buf, *pos);
            }
        }
    }

    fn read_entry(&mut self, key: Vec<u8>, reader: &mut Reader) -> Result<()> {
        let head = reader.u32()?;
        let tail = reader.u32()?;
        let meta_pos = match reader.u8()? {
            0 => None,
            _ => Some(reader.pos()?),
        };
        let count = reader.u32()?;
        for _ in 0..count {
            let seq = reader.u32()?;
            let pos = reader.pos()?;
            self.index.put(&key, seq, pos);
        }
        // The recorded bounds are authoritative, not the widened ones.
        let rec = self.index.ensure(&key);
        rec.head = head;
        rec.tail = tail;
        rec.meta_pos = meta_pos;
        Ok(())
    }

    fn clear_index(&mut self) {
        self.index = crate::index::ListIndex::new();
    }
}

impl DumpStore for SetStore {
    fn index_len(&self) -> usize {
        self.index.len()
    }

    fn write_entries(&self, buf: &mut Vec<u8>) {
        for (key, members) in self.index.iter() {
            put_bytes(buf, key);
            put_u32(buf, members.len() as u32);
            for (fp, pos) in members {
                put_u64(buf, *fp);
                put_pos(buf, *pos);
            }
        }
    }

    fn read_entry(&mut self, key: Vec<u8>, reader: &mut Reader) -> Result<()> {
        let members = reader.u32()?;
        for _ in 0..members {
            let fp = reader.u64()?;
            let pos = reader.pos()?;
            self.index.put_fingerprint(&key, fp, pos);
        }
        Ok(())
    }

    fn clear_index(&mut self) {
        self.index = crate::index::SetIndex::new();
    }
}

impl DumpStore for ZSetStore {
    fn index_len(&self) -> usize {
        self.index.len()
    }

    fn write_entries(&self, buf: &mut Vec<u8>) {
        for (key, rec) in self.index.iter() {
            put_bytes(buf, key);
            put_u32(buf, rec.members.len() as u32);
            for (member, node) in &rec.members {
                put_bytes(buf, member);
                put_f64(buf, node.score);
                put_pos(buf, node.pos);
            }
        }
    }

    fn read_entry(&mut self, key: Vec<u8>, reader: &mut Reader) -> Result<()> {
        let members = reader.u32()?;
        for _ in 0..members {
            let len = reader.uvarint()? as usize;
            let member = reader.take(len)?.to_vec();
            let score = reader.f64()?;
            let pos = reader.pos()?;
            self.index.put(&key, member, score, pos);
        }
        Ok(())
    }

    fn clear_index(&mut self) {
        self.index = crate::index::ZSetIndex::new();
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Options;
    use crate::storage::{DataType, LogFile};
    use crate::tmpfs::TempDir;
    use crate::RoseDB;
    use std::time::Duration;

    #[test]
    fn test_dump_then_reopen_restores_all_types() {
        let dir = TempDir::new().unwrap();
        {
            let db = RoseDB::open(Options::new(dir.path())).unwrap();
            for i in 0..1_000 {
                db.hset(b"my_hash", format!("f-{i:04}").as_bytes(), b"hv").unwrap();
                db.lpush(b"my_list", format!("lv-{i:04}").as_bytes()).unwrap();
                db.sadd(b"my_set", format!("m-{i:04}").as_bytes()).unwrap();
                db.zadd(b"my_zset", (i * 11) as f64, format!("z-{i:04}").as_bytes())
                    .unwrap();
            }
            db.run_dump().unwrap();
            db.close().unwrap();
        }

        for dt in ["hash", "list", "sets", "zset"] {
            assert!(dir.path().join(format!("{dt}.DUMP")).exists());
        }

        let db = RoseDB::open(Options::new(dir.path())).unwrap();
        assert_eq!(db.hlen(b"my_hash").unwrap(), 1_000);
        assert_eq!(db.llen(b"my_list").unwrap(), 1_000);
        assert_eq!(db.scard(b"my_set").unwrap(), 1_000);
        assert_eq!(db.zcard(b"my_zset").unwrap(), 1_000);

        // Values must still resolve through the retained log files.
        assert_eq!(db.hget(b"my_hash", b"f-0042").unwrap().unwrap(), b"hv");
        assert_eq!(db.zscore(b"my_zset", b"z-0042").unwrap(), Some(462.0));
        assert_eq!(db.lpop(b"my_list").unwrap().unwrap(), b"lv-0999");
    }

    #[test]
    fn test_writes_after_dump_are_replayed_on_top() {
        let dir = TempDir::new().unwrap();
        {
            let db = RoseDB::open(Options::new(dir.path())).unwrap();
            for i in 0..100 {
                db.hset(b"h", format!("f-{i:03}").as_bytes(), b"before").unwrap();
            }
            db.run_dump().unwrap();

            db.hset(b"h", b"f-000", b"after").unwrap();
            db.hset(b"h", b"extra", b"after").unwrap();
            db.hdel(b"h", b"f-001").unwrap();
            db.close().unwrap();
        }

        let db = RoseDB::open(Options::new(dir.path())).unwrap();
        assert_eq!(db.hlen(b"h").unwrap(), 100);
        assert_eq!(db.hget(b"h", b"f-000").unwrap().unwrap(), b"after");
        assert_eq!(db.hget(b"h", b"extra").unwrap().unwrap(), b"after");
        assert_eq!(db.hget(b"h", b"f-001").unwrap(), None);
        assert_eq!(db.hget(b"h", b"f-002").unwrap().unwrap(), b"before");
    }

    #[test]
    fn test_corrupt_dump_falls_back_to_replay() {
        let dir = TempDir::new().unwrap();
        {
            let db = RoseDB::open(Options::new(dir.path())).unwrap();
            for i in 0..200 {
                db.sadd(b"s", format!("m-{i:03}").as_bytes()).unwrap();
            }
            db.run_dump().unwrap();
            db.close().unwrap();
        }

        // Flip a byte in the middle of the snapshot.
        let path = dir.path().join("sets.DUMP");
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let db = RoseDB::open(Options::new(dir.path())).unwrap();
        assert_eq!(db.scard(b"s").unwrap(), 200);
        assert!(db.sis_member(b"s", b"m-150").unwrap());
    }

    #[test]
    fn test_dump_rotates_the_active_file() {
        let dir = TempDir::new().unwrap();
        let db = RoseDB::open(Options::new(dir.path())).unwrap();
        db.hset(b"h", b"f", b"v").unwrap();
        db.run_dump().unwrap();

        // The pre-dump writes are sealed in fid 1; fresh appends go to fid 2.
        assert!(dir
            .path()
            .join(LogFile::file_name(DataType::Hash, 1))
            .exists());
        let store = db.core.hashes.read().unwrap();
        assert_eq!(store.files.active_fid(), 2);
    }

    #[test]
    fn test_timer_driven_dump() {
        let dir = TempDir::new().unwrap();
        {
            let opts = Options::new(dir.path())
                .in_memory_dump_interval(Duration::from_millis(150));
            let db = RoseDB::open(opts).unwrap();
            for i in 0..500 {
                db.lpush(b"my_list", format!("v-{i:04}").as_bytes()).unwrap();
            }
            std::thread::sleep(Duration::from_millis(400));
            assert!(dir.path().join("list.DUMP").exists());
            db.close().unwrap();
        }

        let db = RoseDB::open(Options::new(dir.path())).unwrap();
        assert_eq!(db.llen(b"my_list").unwrap(), 500);
    }
}

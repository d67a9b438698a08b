//! RoseDB is an embedded key/value storage engine with five logical data
//! types (strings, hashes, lists, sets and sorted sets) backed by
//! append-only on-disk logs and in-memory indexes.
//!
//! Durability comes from the logs; read performance from per-type indexes
//! that are reconstructed from the logs (plus optional snapshots) at open.
//! Two background workers reclaim dead log space and snapshot the
//! non-string indexes.
//!
//! ```no_run
//! use rosedb::{Options, RoseDB};
//!
//! let db = RoseDB::open(Options::new("/tmp/rosedb"))?;
//! db.set(b"name", b"rose")?;
//! assert_eq!(db.get(b"name")?, b"rose");
//! db.close()?;
//! # Ok::<(), rosedb::Error>(())
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod flock;
pub mod index;
pub mod storage;
pub mod worker;

#[cfg(test)]
pub(crate) mod tmpfs;

pub use config::{IndexMode, IoType, Options};
pub use db::iterator::IterOptions;
pub use db::RoseDB;
pub use error::{Error, Result};
pub use storage::DataType;

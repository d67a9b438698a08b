use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// RoseDB errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The key does not exist, or it has expired.
    NotFound,
    /// Invalid user input: empty key where one is required, zero TTL, etc.
    InvalidArgument(String),
    /// A log entry failed its checksum, or its header is malformed.
    CorruptEntry(String),
    /// A read ended before a complete entry could be decoded.
    Truncated,
    /// An IO error.
    Io(String),
    /// The database has been closed.
    Closed,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "key not found"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::CorruptEntry(msg) => write!(f, "corrupt log entry: {msg}"),
            Error::Truncated => write!(f, "truncated log entry"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Closed => write!(f, "database is closed"),
        }
    }
}

/// A RoseDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

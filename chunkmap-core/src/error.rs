//! Error types shared by every chunkmap operation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers that need to pick an exit status
/// or decide whether a failure is worth retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    SourceUnreadable,
    MalformedMap,
    Integrity,
    ChunkCount,
    UnsupportedAlgorithm,
    Cancelled,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported hash algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("cannot read {path:?}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {path:?}: {source}")]
    ChunkWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed map file at key {key:?}: {reason}")]
    MalformedMapFile { key: String, reason: String },

    #[error("no section for {0:?} in map file")]
    SectionNotFound(String),

    #[error("chunk {label} digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { label: String, expected: String, actual: String },

    #[error("running file digest diverged after chunk {label}")]
    CumulativeDigestMismatch { label: String },

    #[error("file checksum mismatch: expected {expected}, got {actual}")]
    FileChecksumMismatch { expected: String, actual: String },

    #[error("produced more than {declared} chunks before end of stream")]
    ChunkCountExceeded { declared: u64 },

    #[error("chunk count invariant violated: {0}")]
    ChunkCountInvariant(String),

    #[error("source {path:?} changed while splitting: expected {expected} bytes, read {actual}")]
    SourceChanged { path: PathBuf, expected: u64, actual: u64 },

    #[error("chunk label {0:?} does not resolve inside the chunk directory")]
    UnsafeLabel(String),

    #[error("path {0:?} cannot be stored in a map file")]
    UnrepresentablePath(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) | Error::UnrepresentablePath(_) => ErrorKind::Config,
            Error::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Error::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            Error::MalformedMapFile { .. } | Error::SectionNotFound(_) | Error::UnsafeLabel(_) => {
                ErrorKind::MalformedMap
            }
            Error::DigestMismatch { .. }
            | Error::CumulativeDigestMismatch { .. }
            | Error::FileChecksumMismatch { .. }
            | Error::SourceChanged { .. } => ErrorKind::Integrity,
            Error::ChunkCountExceeded { .. } | Error::ChunkCountInvariant(_) => {
                ErrorKind::ChunkCount
            }
            Error::Cancelled => ErrorKind::Cancelled,
            Error::ChunkWrite { .. } | Error::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedMapFile { key: key.into(), reason: reason.into() }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::SourceUnreadable { path: path.into(), source }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::ChunkWrite { path: path.into(), source }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

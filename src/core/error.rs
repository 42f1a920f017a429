use std::io;
use thiserror::Error;

/// Engine error taxonomy. Write-path errors always leave the collection in
/// the state it had before the operation was invoked.
#[derive(Debug, Error)]
pub enum Error {
    #[error("document not found")]
    NotFound,

    #[error("conflict: expected revision {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },

    #[error("unique constraint violated")]
    UniqueConstraintViolated,

    #[error("edge attribute missing or not a string")]
    InvalidEdgeAttribute,

    #[error("invalid key generator options")]
    InvalidKeyGenerator,

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("timed out waiting for collection lock")]
    LockTimeout,

    #[error("deadlock detected")]
    Deadlock,

    #[error("out of memory")]
    OutOfMemory,

    #[error("no journal available")]
    NoJournal,

    #[error("filesystem full")]
    FilesystemFull,

    #[error("cannot memory-map datafile: {0}")]
    MmapFailed(String),

    #[error("corrupt datafile: {0}")]
    CorruptDatafile(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::BadParameter(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl Error {
    /// Severity rank used when aggregating multi-index results; lower wins.
    pub fn severity(&self) -> u8 {
        match self {
            Error::OutOfMemory => 0,
            Error::UniqueConstraintViolated => 1,
            _ => 2,
        }
    }

    /// Fold `next` into an accumulated result, keeping the worst error.
    pub fn accumulate(worst: &mut Option<Error>, next: Error) {
        match worst {
            Some(current) if current.severity() <= next.severity() => {}
            _ => *worst = Some(next),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

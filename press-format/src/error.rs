use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by cursor, reader and writer operations.
///
/// Every variant is fatal to the call that raised it; nothing is retried
/// internally. Callers resume by re-invoking with their last persisted
/// cursor state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to open archive. Path: '{}'", .path.display())]
    NotAccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to seek to offset {offset} of archive. Path: '{}'", .path.display())]
    NotSeekable {
        path: PathBuf,
        offset: i64,
        #[source]
        source: io::Error,
    },

    #[error("Unable to tell offset of archive. Path: '{}'", .path.display())]
    NotTellable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to read content. Path: '{}'", .path.display())]
    NotReadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of disk space. Unable to write content to file. Path: '{}'", .path.display())]
    QuotaExceeded {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Destination is not a directory. Path: '{}'", .path.display())]
    NotDirectory { path: PathBuf },

    #[error("Malformed header block: {reason}")]
    MalformedHeader { reason: String },

    #[error("Unable to close archive. Path: '{}'", .path.display())]
    NotClosable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

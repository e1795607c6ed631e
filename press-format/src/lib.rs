//! The innards of the press sequential archive format: a fixed-layout
//! header codec, a seekable archive cursor, and a resumable extractor.

mod cursor;
mod error;
mod file;
mod header;
pub mod path;
mod record;

pub use cursor::ArchiveCursor;
pub use error::{Error, Result};
pub use header::{EntryHeader, BLOCK_SIZE};
pub use path::RewriteRule;
pub use record::Entry;

#[cfg(feature = "reader")]
pub use file::{ArchiveTotals, ExtractOptions, ExtractStats, ExtractStep, PressReader};
#[cfg(feature = "writer")]
pub use file::PressWriter;

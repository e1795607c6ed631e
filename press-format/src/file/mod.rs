#[cfg(feature = "reader")]
mod reader;
#[cfg(feature = "writer")]
mod writer;

#[cfg(feature = "reader")]
pub use reader::{ArchiveTotals, ExtractOptions, ExtractStats, ExtractStep, PressReader};
#[cfg(feature = "writer")]
pub use writer::PressWriter;

/// Payload bytes moved per copy step, on both the read and write side.
pub(crate) const COPY_CHUNK_SIZE: u64 = 512_000;

#[cfg(all(test, feature = "writer"))]
mod tests;

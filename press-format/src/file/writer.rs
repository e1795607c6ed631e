use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::debug;

use crate::cursor::ArchiveCursor;
use crate::error::{Error, Result};
use crate::header::EntryHeader;

use super::COPY_CHUNK_SIZE;

/// Streams entries into a new archive: one header block then the raw
/// payload per file, with the sentinel block appended by `finish`.
#[derive(Debug)]
pub struct PressWriter {
    cursor: Option<ArchiveCursor>,
    path: PathBuf,
}

impl Drop for PressWriter {
    fn drop(&mut self) {
        // A dropped writer still terminates its archive.
        if let Some(cursor) = self.cursor.take() {
            let _ = cursor.close(true);
        }
    }
}

impl PressWriter {
    /// Creates a new archive for writing, erroring if the path already
    /// exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<PressWriter> {
        let path = path.as_ref().to_path_buf();
        let cursor = ArchiveCursor::create(&path)?;
        Ok(PressWriter {
            cursor: Some(cursor),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry from any reader with a known payload size. The
    /// size goes into the header first, so it must be exact. An empty
    /// `dir` places the entry at the archive root.
    pub fn insert<R: Read>(
        &mut self,
        name: &str,
        dir: &str,
        size: u64,
        mtime: u64,
        content: &mut R,
    ) -> Result<()> {
        let header = EntryHeader {
            name: name.to_string(),
            size,
            mtime,
            path: if dir.is_empty() {
                ".".to_string()
            } else {
                dir.to_string()
            },
        };
        let block = header.encode()?;

        let archive_path = self.path.clone();
        let cursor = match self.cursor.as_mut() {
            Some(cursor) => cursor,
            None => return Err(finished_error(&archive_path)),
        };

        cursor.write_chunk(&block)?;

        let mut remaining = size;
        if remaining > 0 {
            let mut buf = vec![0u8; COPY_CHUNK_SIZE.min(remaining) as usize];
            while remaining > 0 {
                let chunk_len = COPY_CHUNK_SIZE.min(remaining) as usize;
                let chunk = &mut buf[..chunk_len];
                content
                    .read_exact(chunk)
                    .map_err(|source| Error::NotReadable {
                        path: archive_path.clone(),
                        source,
                    })?;
                cursor.write_chunk(chunk)?;
                remaining -= chunk_len as u64;
            }
        }

        debug!(name = %name, dir = %dir, size = size, "inserted entry");
        Ok(())
    }

    /// Appends a file from disk, taking its size and mtime from
    /// filesystem metadata. Returns the payload size written.
    pub fn append_file<P: AsRef<Path>>(&mut self, src: P, name: &str, dir: &str) -> Result<u64> {
        let src = src.as_ref();
        let meta = src.metadata().map_err(|source| Error::NotAccessible {
            path: src.to_path_buf(),
            source,
        })?;
        let mtime = FileTime::from_last_modification_time(&meta)
            .unix_seconds()
            .max(0) as u64;

        let mut file = fs::File::open(src).map_err(|source| Error::NotAccessible {
            path: src.to_path_buf(),
            source,
        })?;

        self.insert(name, dir, meta.len(), mtime, &mut file)?;
        Ok(meta.len())
    }

    /// Appends the sentinel block and flushes the archive to disk.
    pub fn finish(mut self) -> Result<()> {
        match self.cursor.take() {
            Some(cursor) => cursor.close(true),
            None => Ok(()),
        }
    }
}

fn finished_error(path: &Path) -> Error {
    Error::NotAccessible {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Other, "archive already finished"),
    }
}

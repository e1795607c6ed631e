use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::header::{is_sentinel, BLOCK_SIZE, SENTINEL};

/// Seekable byte-level access to one archive file.
///
/// Two end conditions are tracked separately: the logical end, where a
/// sentinel block was read, and the physical end, where the stream ran
/// out of bytes. After the sentinel the cursor parks itself at the end of
/// the stream so the physical condition reads true from then on.
#[derive(Debug)]
pub struct ArchiveCursor {
    file: File,
    path: PathBuf,
    writable: bool,
    saw_sentinel: bool,
    reached_eof: bool,
}

impl ArchiveCursor {
    /// Opens an existing archive read-only, positioned at the start.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ArchiveCursor> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Error::NotAccessible {
            path: path.clone(),
            source,
        })?;
        Ok(ArchiveCursor {
            file,
            path,
            writable: false,
            saw_sentinel: false,
            reached_eof: false,
        })
    }

    /// Creates a new archive for writing, refusing to overwrite.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<ArchiveCursor> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| Error::NotAccessible {
                path: path.clone(),
                source,
            })?;
        Ok(ArchiveCursor {
            file,
            path,
            writable: true,
            saw_sentinel: false,
            reached_eof: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves to an absolute byte offset. Repositioning clears both end
    /// conditions.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| Error::NotSeekable {
                path: self.path.clone(),
                offset: offset as i64,
                source,
            })?;
        self.saw_sentinel = false;
        self.reached_eof = false;
        Ok(())
    }

    /// Moves relative to the current position. Repositioning clears both
    /// end conditions.
    pub fn seek_relative(&mut self, offset: i64) -> Result<()> {
        self.file
            .seek(SeekFrom::Current(offset))
            .map_err(|source| Error::NotSeekable {
                path: self.path.clone(),
                offset,
                source,
            })?;
        self.saw_sentinel = false;
        self.reached_eof = false;
        Ok(())
    }

    /// Reports the current byte offset.
    pub fn position(&mut self) -> Result<u64> {
        self.file
            .seek(SeekFrom::Current(0))
            .map_err(|source| Error::NotTellable {
                path: self.path.clone(),
                source,
            })
    }

    /// Reads the next header-sized block, or `None` once the stream can
    /// no longer supply a full one, which latches the physical end.
    pub fn read_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut filled = 0;

        while filled < BLOCK_SIZE {
            match self.file.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::NotReadable {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }

        if filled < BLOCK_SIZE {
            if filled > 0 {
                debug!(bytes = filled, "short block at end of archive");
            }
            self.reached_eof = true;
            return Ok(None);
        }

        if is_sentinel(&block) {
            self.saw_sentinel = true;
        }

        Ok(Some(block))
    }

    /// Reads exactly `buf.len()` payload bytes. A stream that ends early
    /// is as much of a failure here as one that errors.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact(buf)
            .map_err(|source| Error::NotReadable {
                path: self.path.clone(),
                source,
            })
    }

    /// Writes raw bytes at the current position.
    pub fn write_chunk(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .map_err(|source| Error::QuotaExceeded {
                path: self.path.clone(),
                source,
            })
    }

    /// True once a sentinel block has been read since the last seek.
    pub fn is_at_sentinel(&self) -> bool {
        self.saw_sentinel
    }

    /// True once the stream has failed to produce more bytes.
    pub fn is_at_physical_eof(&self) -> bool {
        self.reached_eof
    }

    /// Parks the cursor at the end of the stream, consuming the final
    /// byte so the physical end condition holds from here on.
    pub fn force_eof(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::End(-1))
            .map_err(|source| Error::NotSeekable {
                path: self.path.clone(),
                offset: -1,
                source,
            })?;

        let mut byte = [0u8; 1];
        loop {
            match self.file.read(&mut byte) {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::NotReadable {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }

        self.reached_eof = true;
        Ok(())
    }

    /// Closes the cursor, first appending the sentinel block when asked.
    /// Write-mode cursors flush to disk before the handle goes back to
    /// the OS.
    pub fn close(mut self, write_sentinel: bool) -> Result<()> {
        if write_sentinel {
            self.write_chunk(&SENTINEL)?;
        }
        if self.writable {
            self.file.sync_all().map_err(|source| Error::NotClosable {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

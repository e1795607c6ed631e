use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::{Duration, Instant};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::cursor::ArchiveCursor;
use crate::error::{Error, Result};
use crate::header::{is_sentinel, EntryHeader, BLOCK_SIZE};
use crate::path::{escape_separators, is_excluded, rewrite, RewriteRule};
use crate::record::Entry;

use super::COPY_CHUNK_SIZE;

/// Extraction tuning shared by every call in a run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Entry path prefixes to skip entirely.
    pub exclude: Vec<String>,
    /// Prefix rewrites applied to entry paths before joining the
    /// destination root.
    pub rewrite: Vec<RewriteRule>,
    /// Mode bits for fully extracted files (unix only).
    pub file_mode: u32,
    /// Mode bits for directories created along the way (unix only).
    pub dir_mode: u32,
    /// Wall-clock budget for a single call, checked once per copied
    /// chunk. `None` disables the check.
    pub time_budget: Option<Duration>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            exclude: Vec::new(),
            rewrite: Vec::new(),
            file_mode: 0o644,
            dir_mode: 0o755,
            time_budget: None,
        }
    }
}

/// Outcome of a single `extract_next` call.
#[derive(Debug, Clone)]
pub struct ExtractStep {
    /// False when the call stopped mid-entry on its time budget.
    pub completed: bool,
    /// Cursor position after the call. Persist it and seek back to it to
    /// resume from another process.
    pub archive_offset: u64,
    /// Bytes of the current entry already on disk; zero once the entry
    /// completed. Feed it back into the next call.
    pub entry_offset: u64,
    /// Destination bytes written by this call alone.
    pub bytes_written: u64,
    /// The entry this call worked on, when a header was consumed.
    pub entry: Option<Entry>,
    /// True when the payload was passed over without writing, either
    /// excluded or with an unwritable destination.
    pub skipped: bool,
}

/// Whole-archive tallies from a single header walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveTotals {
    /// Number of file entries.
    pub entries: u64,
    /// Sum of payload sizes in bytes.
    pub bytes: u64,
}

/// Accumulated results of an `extract_all` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub entries_extracted: u64,
    pub entries_skipped: u64,
    pub bytes_written: u64,
}

/// Sequential reader over one archive, driving resumable extraction.
///
/// The reader never buffers ahead; its position in the archive is the
/// whole of its state, which is what makes persisted offsets from one
/// process valid in the next.
#[derive(Debug)]
pub struct PressReader {
    cursor: ArchiveCursor,
    totals: Option<ArchiveTotals>,
}

impl PressReader {
    /// Opens an archive read-only, cursor at the start.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<PressReader> {
        let cursor = ArchiveCursor::open(path)?;
        Ok(PressReader {
            cursor,
            totals: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.cursor.path()
    }

    /// Repositions the cursor, typically to an `archive_offset` persisted
    /// from an earlier run.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.cursor.seek(offset)
    }

    /// Current archive byte offset.
    pub fn position(&mut self) -> Result<u64> {
        self.cursor.position()
    }

    /// True once the cursor has run off the end of the archive, whether
    /// through the sentinel or by exhausting the stream.
    pub fn is_finished(&self) -> bool {
        self.cursor.is_at_physical_eof()
    }

    pub fn close(self) -> Result<()> {
        self.cursor.close(false)
    }

    /// Single-pass tallies over every header, computed once and cached
    /// for the life of the reader. The walk leaves the cursor at the
    /// physical end; seek before extracting.
    pub fn totals(&mut self) -> Result<ArchiveTotals> {
        if let Some(totals) = self.totals {
            return Ok(totals);
        }

        let mut totals = ArchiveTotals {
            entries: 0,
            bytes: 0,
        };
        self.walk_headers(|entry| {
            totals.entries += 1;
            totals.bytes += entry.size;
        })?;
        debug!(
            entries = totals.entries,
            bytes = totals.bytes,
            "scanned archive"
        );

        self.totals = Some(totals);
        Ok(totals)
    }

    /// Decodes every entry in order. The walk leaves the cursor at the
    /// physical end.
    pub fn entries(&mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        self.walk_headers(|entry| entries.push(entry))?;
        Ok(entries)
    }

    fn walk_headers<F: FnMut(Entry)>(&mut self, mut f: F) -> Result<()> {
        self.cursor.seek(0)?;

        while let Some(block) = self.cursor.read_block()? {
            if is_sentinel(&block) {
                // Not necessarily the last block on disk; keep walking.
                continue;
            }

            let entry = Entry::from_header(EntryHeader::decode(&block)?);
            self.cursor.seek_relative(entry.size as i64)?;
            f(entry);
        }

        Ok(())
    }

    /// Extracts the entry under the cursor, or resumes the current one
    /// when `entry_offset` is non-zero.
    ///
    /// With a non-zero `entry_offset` the cursor must sit exactly where
    /// the previous partial call left it; the header is recovered by
    /// seeking back over the partial payload plus one block.
    pub fn extract_next(
        &mut self,
        location: &Path,
        options: &ExtractOptions,
        entry_offset: u64,
    ) -> Result<ExtractStep> {
        if !location.is_dir() {
            return Err(Error::NotDirectory {
                path: location.to_path_buf(),
            });
        }

        if entry_offset > 0 {
            self.cursor
                .seek_relative(-((entry_offset + BLOCK_SIZE as u64) as i64))?;
        }

        let block = match self.cursor.read_block()? {
            Some(block) => block,
            None => return self.empty_step(),
        };

        if is_sentinel(&block) {
            debug!("reached end of archive");
            self.cursor.force_eof()?;
            return self.empty_step();
        }

        let entry = Entry::from_header(EntryHeader::decode(&block)?);

        if is_excluded(&entry.path, &options.exclude) {
            debug!(path = %entry.path, "skipping excluded entry");
            self.cursor.seek_relative(entry.size as i64)?;
            return Ok(ExtractStep {
                completed: true,
                archive_offset: self.cursor.position()?,
                entry_offset: 0,
                bytes_written: 0,
                entry: Some(entry),
                skipped: true,
            });
        }

        let dest_dir = join_destination(location, &rewrite(&entry.dir, &options.rewrite));
        let dest_file = join_destination(location, &rewrite(&entry.path, &options.rewrite));

        if !dest_dir.is_dir() {
            if let Err(e) = create_dir_all_with_mode(&dest_dir, options.dir_mode) {
                warn!(path = %dest_dir.display(), error = %e, "cannot create entry directory");
            }
        }

        self.copy_payload(&dest_file, entry, entry_offset, options)
    }

    /// Drives `extract_next` until the cursor is finished, resuming
    /// partial steps immediately.
    pub fn extract_all(&mut self, location: &Path, options: &ExtractOptions) -> Result<ExtractStats> {
        let mut stats = ExtractStats::default();
        let mut entry_offset = 0;

        while !self.is_finished() {
            let step = self.extract_next(location, options, entry_offset)?;
            stats.bytes_written += step.bytes_written;

            if step.completed {
                entry_offset = 0;
                if step.entry.is_some() {
                    if step.skipped {
                        stats.entries_skipped += 1;
                    } else {
                        stats.entries_extracted += 1;
                    }
                }
            } else {
                entry_offset = step.entry_offset;
            }
        }

        Ok(stats)
    }

    fn empty_step(&mut self) -> Result<ExtractStep> {
        Ok(ExtractStep {
            completed: true,
            archive_offset: self.cursor.position()?,
            entry_offset: 0,
            bytes_written: 0,
            entry: None,
            skipped: false,
        })
    }

    fn copy_payload(
        &mut self,
        dest: &Path,
        entry: Entry,
        entry_offset: u64,
        options: &ExtractOptions,
    ) -> Result<ExtractStep> {
        let started = Instant::now();

        if entry_offset > 0 {
            self.cursor.seek_relative(entry_offset as i64)?;
        }
        let mut remaining = entry.size.saturating_sub(entry_offset);

        let mut file = match open_destination(dest, entry_offset) {
            Ok(file) => file,
            Err(e) => {
                // The archive must keep advancing past a payload nobody
                // can receive.
                warn!(path = %dest.display(), error = %e, "cannot open destination, skipping entry");
                self.cursor.seek_relative(remaining as i64)?;
                return Ok(ExtractStep {
                    completed: true,
                    archive_offset: self.cursor.position()?,
                    entry_offset: 0,
                    bytes_written: 0,
                    entry: Some(entry),
                    skipped: true,
                });
            }
        };

        let start_len = file.metadata().map(|m| m.len()).unwrap_or(entry_offset);
        let mut written = 0u64;
        let mut completed = true;

        if remaining > 0 {
            let mut buf = vec![0u8; COPY_CHUNK_SIZE.min(remaining) as usize];

            while remaining > 0 {
                let chunk_len = COPY_CHUNK_SIZE.min(remaining) as usize;
                let chunk = &mut buf[..chunk_len];

                if let Err(e) = self.cursor.read_chunk(chunk) {
                    let _ = file.set_len(start_len);
                    return Err(e);
                }

                if let Err(source) = file.write_all(chunk) {
                    let _ = file.set_len(start_len);
                    return Err(Error::QuotaExceeded {
                        path: dest.to_path_buf(),
                        source,
                    });
                }

                remaining -= chunk_len as u64;
                written += chunk_len as u64;

                if let Some(budget) = options.time_budget {
                    if started.elapsed() > budget {
                        completed = false;
                        break;
                    }
                }
            }
        }

        if completed {
            drop(file);
            restore_metadata(dest, &entry, options);
            debug!(path = %entry.path, size = entry.size, "extracted entry");
        }

        let entry_offset = if completed { 0 } else { entry_offset + written };

        Ok(ExtractStep {
            completed,
            archive_offset: self.cursor.position()?,
            entry_offset,
            bytes_written: written,
            entry: Some(entry),
            skipped: false,
        })
    }
}

/// Joins the archive-relative portion onto the destination root. The
/// relative part is separator-escaped and stripped of any leading
/// separator so it can never replace the root outright.
fn join_destination(location: &Path, relative: &str) -> PathBuf {
    let relative = escape_separators(relative);
    location.join(relative.trim_start_matches(MAIN_SEPARATOR))
}

fn open_destination(path: &Path, entry_offset: u64) -> io::Result<File> {
    if entry_offset == 0 {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(path)
    }
}

/// Mtime and mode bits go on only after the last payload byte; a partial
/// file keeps its in-progress look.
fn restore_metadata(dest: &Path, entry: &Entry, options: &ExtractOptions) {
    let mtime = FileTime::from_unix_time(entry.mtime as i64, 0);
    if let Err(e) = filetime::set_file_mtime(dest, mtime) {
        warn!(path = %dest.display(), error = %e, "cannot restore mtime");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dest, fs::Permissions::from_mode(options.file_mode)) {
            warn!(path = %dest.display(), error = %e, "cannot restore permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = options;
}

fn create_dir_all_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut missing = Vec::new();
        let mut probe = Some(path);
        while let Some(p) = probe {
            if p.as_os_str().is_empty() || p.exists() {
                break;
            }
            missing.push(p.to_path_buf());
            probe = p.parent();
        }

        fs::create_dir_all(path)?;

        for dir in missing.into_iter().rev() {
            fs::set_permissions(&dir, fs::Permissions::from_mode(mode))?;
        }

        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = mode;
        fs::create_dir_all(path)
    }
}

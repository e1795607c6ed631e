use std::path::MAIN_SEPARATOR;

use crate::header::EntryHeader;
use crate::path::normalize_separators;

/// A single archived file with its destination-relative location resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Relative path under the destination root, directory part included.
    pub path: String,
    /// Relative directory the file lives in, empty at the archive root.
    pub dir: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Modification time as seconds since the epoch.
    pub mtime: u64,
}

impl Entry {
    /// Resolves a decoded header. A `.` directory collapses to the bare
    /// name, and any forward slashes become the platform separator.
    pub fn from_header(header: EntryHeader) -> Entry {
        let EntryHeader {
            name,
            size,
            mtime,
            path,
        } = header;

        let (path, dir) = if path == "." || path.is_empty() {
            (name, String::new())
        } else {
            (format!("{}{}{}", path, MAIN_SEPARATOR, name), path)
        };

        Entry {
            path: normalize_separators(&path),
            dir: normalize_separators(&dir),
            size,
            mtime,
        }
    }
}

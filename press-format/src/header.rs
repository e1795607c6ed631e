use crate::error::{Error, Result};

/// Width of the name field in bytes.
pub const NAME_LEN: usize = 255;
/// Width of the size field in bytes, holding a decimal ASCII integer.
pub const SIZE_LEN: usize = 14;
/// Width of the mtime field in bytes, holding decimal ASCII epoch seconds.
pub const MTIME_LEN: usize = 12;
/// Width of the path field in bytes.
pub const PATH_LEN: usize = 4096;

/// Total size of one header block.
pub const BLOCK_SIZE: usize = NAME_LEN + SIZE_LEN + MTIME_LEN + PATH_LEN;

const SIZE_OFFSET: usize = NAME_LEN;
const MTIME_OFFSET: usize = SIZE_OFFSET + SIZE_LEN;
const PATH_OFFSET: usize = MTIME_OFFSET + MTIME_LEN;

/// The terminator block every archive ends with.
pub(crate) const SENTINEL: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

/// Padding bytes stripped from both ends of a field.
const PADDING: &[u8] = b" \t\n\r\0\x0b";

/// A sentinel is pure padding and decodes to no entry. Checked before any
/// field splitting is attempted.
pub fn is_sentinel(block: &[u8]) -> bool {
    block.iter().all(|b| *b == 0 || *b == b' ')
}

/// One header block, fields decoded but paths not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Base name of the file.
    pub name: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Modification time as seconds since the epoch.
    pub mtime: u64,
    /// Directory the file lives in, `.` for the archive root.
    pub path: String,
}

impl EntryHeader {
    /// Splits a non-sentinel block into its four fields.
    pub fn decode(block: &[u8; BLOCK_SIZE]) -> Result<EntryHeader> {
        let name = field_str(&block[..SIZE_OFFSET], "name")?;
        let size = field_u64(&block[SIZE_OFFSET..MTIME_OFFSET], "size")?;
        let mtime = field_u64(&block[MTIME_OFFSET..PATH_OFFSET], "mtime")?;
        let path = field_str(&block[PATH_OFFSET..], "path")?;

        if name.is_empty() {
            return Err(Error::MalformedHeader {
                reason: "name field is empty".to_string(),
            });
        }

        Ok(EntryHeader {
            name,
            size,
            mtime,
            path,
        })
    }

    /// Packs the fields back into a NUL-padded block.
    pub fn encode(&self) -> Result<[u8; BLOCK_SIZE]> {
        if self.name.is_empty() {
            return Err(Error::MalformedHeader {
                reason: "name field is empty".to_string(),
            });
        }

        let mut block = [0u8; BLOCK_SIZE];
        put_field(&mut block[..SIZE_OFFSET], self.name.as_bytes(), "name")?;
        put_field(
            &mut block[SIZE_OFFSET..MTIME_OFFSET],
            self.size.to_string().as_bytes(),
            "size",
        )?;
        put_field(
            &mut block[MTIME_OFFSET..PATH_OFFSET],
            self.mtime.to_string().as_bytes(),
            "mtime",
        )?;
        put_field(&mut block[PATH_OFFSET..], self.path.as_bytes(), "path")?;
        Ok(block)
    }
}

fn trim_padding(mut bytes: &[u8]) -> &[u8] {
    while let Some(first) = bytes.first() {
        if PADDING.contains(first) {
            bytes = &bytes[1..];
        } else {
            break;
        }
    }
    while let Some(last) = bytes.last() {
        if PADDING.contains(last) {
            bytes = &bytes[..bytes.len() - 1];
        } else {
            break;
        }
    }
    bytes
}

fn field_str(bytes: &[u8], field: &'static str) -> Result<String> {
    let trimmed = trim_padding(bytes);
    match std::str::from_utf8(trimmed) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => Err(Error::MalformedHeader {
            reason: format!("{} field is not valid UTF-8", field),
        }),
    }
}

fn field_u64(bytes: &[u8], field: &'static str) -> Result<u64> {
    let s = field_str(bytes, field)?;
    s.parse::<u64>().map_err(|_| Error::MalformedHeader {
        reason: format!("{} field is not a decimal integer: '{}'", field, s),
    })
}

fn put_field(dest: &mut [u8], value: &[u8], field: &'static str) -> Result<()> {
    if value.len() > dest.len() {
        return Err(Error::MalformedHeader {
            reason: format!(
                "{} field is {} bytes, at most {} fit",
                field,
                value.len(),
                dest.len()
            ),
        });
    }
    dest[..value.len()].copy_from_slice(value);
    Ok(())
}

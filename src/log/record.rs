//! Line codec for the record log.
//!
//! Every record is one line:
//!
//! ```text
//! <flag>#<key> <value>\n
//! ```
//!
//! `flag` is `1` for a live record and `0` once the record is deleted. It is
//! always the first byte of the record so a delete is a single-byte in-place
//! write at the record offset. The value of a record starting at `offset`
//! begins at `offset + key.len() + 3`.

use thiserror::Error;

pub(crate) const LIVE: u8 = b'1';
pub(crate) const DELETED: u8 = b'0';
const SEPARATOR: u8 = b'#';
const KEY_END: u8 = b' ';
const NEWLINE: u8 = b'\n';

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Malformed record at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: &'static str },
}

/// A decoded record borrowing from the line it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogRecord<'a> {
    pub(crate) live: bool,
    pub(crate) key: &'a [u8],
    pub(crate) value: &'a [u8],
}

/// Checks that a key can be written without breaking the line format.
pub(crate) fn check_key(key: &[u8]) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("key must not be empty");
    }
    if key.contains(&KEY_END) || key.contains(&NEWLINE) {
        return Err("key must not contain spaces or newlines");
    }
    Ok(())
}

/// Checks that a value can be written without breaking the line format.
pub(crate) fn check_value(value: &[u8]) -> Result<(), &'static str> {
    if value.contains(&NEWLINE) {
        return Err("value must not contain newlines");
    }
    Ok(())
}

/// Serializes a live record, newline included.
pub(crate) fn encode(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header_len(key) + value.len() + 1);
    buf.extend_from_slice(&live_header(key));
    buf.extend_from_slice(value);
    buf.push(NEWLINE);
    buf
}

/// The bytes a live record of `key` starts with: `1#<key> `.
pub(crate) fn live_header(key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header_len(key));
    buf.push(LIVE);
    buf.push(SEPARATOR);
    buf.extend_from_slice(key);
    buf.push(KEY_END);
    buf
}

/// Distance from the record start to the first value byte.
pub(crate) fn header_len(key: &[u8]) -> usize {
    key.len() + 3
}

/// Parses one line with its trailing newline already stripped.
pub(crate) fn parse_line(line: &[u8]) -> Result<LogRecord<'_>, &'static str> {
    let live = match line.first() {
        Some(&LIVE) => true,
        Some(&DELETED) => false,
        Some(_) => return Err("unknown flag byte"),
        None => return Err("empty line"),
    };
    if line.get(1) != Some(&SEPARATOR) {
        return Err("missing '#' separator");
    }

    let rest = &line[2..];
    let space = rest
        .iter()
        .position(|&b| b == KEY_END)
        .ok_or("missing key terminator")?;
    if space == 0 {
        return Err("empty key");
    }

    Ok(LogRecord {
        live,
        key: &rest[..space],
        value: &rest[space + 1..],
    })
}

// ------------------------------------------------------------------------------------------------
// Iteration
// ------------------------------------------------------------------------------------------------

/// Walks the complete lines of a log image, yielding `(offset, record)`.
///
/// A malformed line yields an error and iteration continues after it. A
/// trailing fragment without a newline ends iteration; [`RecordIter::consumed`]
/// then reports where the last complete line ended.
pub(crate) struct RecordIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordIter<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes covered by the complete lines seen so far.
    pub(crate) fn consumed(&self) -> u64 {
        self.pos as u64
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<(u64, LogRecord<'a>), RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data;
        let rest = &data[self.pos..];
        let end = rest.iter().position(|&b| b == NEWLINE)?;

        let offset = self.pos as u64;
        self.pos += end + 1;

        Some(
            parse_line(&rest[..end])
                .map(|record| (offset, record))
                .map_err(|reason| RecordError::Malformed { offset, reason }),
        )
    }
}

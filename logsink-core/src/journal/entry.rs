//! Journal line encoding
//!
//! One record per line, encoded as a JSON object followed by `\n`.

use crate::{EventRecord, Result, SinkError};
use bytes::{BufMut, Bytes, BytesMut};

/// Record separator
pub const SEPARATOR: u8 = b'\n';

/// Encode a record as a journal line, separator included
pub fn encode_line(record: &EventRecord) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64 + record.event_name().len()).writer();
    serde_json::to_writer(&mut buf, record)?;

    let mut buf = buf.into_inner();
    buf.put_u8(SEPARATOR);
    Ok(buf.freeze())
}

/// Decode one journal line
///
/// Leading/trailing NUL bytes and whitespace are ignored; a line that is
/// empty after trimming is reported as [`SinkError::InvalidRecord`].
pub fn decode_line(line: &[u8]) -> Result<EventRecord> {
    let trimmed = trim(line);
    if trimmed.is_empty() {
        return Err(SinkError::InvalidRecord("empty journal line".into()));
    }

    let record: EventRecord = serde_json::from_slice(trimmed)?;
    record.validate()?;
    Ok(record)
}

pub(crate) fn trim(line: &[u8]) -> &[u8] {
    let is_padding = |b: &u8| *b == 0 || b.is_ascii_whitespace();
    let start = line.iter().position(|b| !is_padding(b)).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !is_padding(b)).map_or(start, |i| i + 1);
    &line[start..end]
}

//! Update record - the atomic unit of change published on an entity channel
//!
//! Record = Epoch + Field Diff + Events
//!
//! ```text
//! [EPOCH:8 LE]
//! [FIELD_COUNT:4 LE] { [KEY_LEN:4 LE][KEY] [VALUE_LEN:4 LE][VALUE] }*
//! [EVENT_COUNT:4 LE] { [EVENT_LEN:4 LE][EVENT] }*
//! ```
//!
//! A zero-length value in the field diff is a deletion.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use shoal_core::{Epoch, FieldMap, ShoalError, ShoalResult};

/// Width of every count and length prefix
const PREFIX_SIZE: usize = 4;

/// Minimum encoded size (epoch + two empty lists)
pub const MIN_RECORD_SIZE: usize = Epoch::SIZE + 2 * PREFIX_SIZE;

/// One write batch as seen on the change log
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateRecord {
    /// Epoch stamped by the writer
    pub epoch: Epoch,
    /// Field changes (tombstone = delete)
    pub fields: FieldMap,
    /// Opaque events, in send order
    pub events: Vec<Bytes>,
}

impl UpdateRecord {
    /// Create a new record
    pub fn new(epoch: Epoch, fields: FieldMap, events: Vec<Bytes>) -> Self {
        UpdateRecord {
            epoch,
            fields,
            events,
        }
    }

    /// Calculate the encoded size
    pub fn encoded_size(&self) -> usize {
        let fields: usize = self
            .fields
            .iter()
            .map(|(k, v)| 2 * PREFIX_SIZE + k.len() + v.len())
            .sum();
        let events: usize = self.events.iter().map(|e| PREFIX_SIZE + e.len()).sum();
        MIN_RECORD_SIZE + fields + events
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());

        buf.put_slice(&self.epoch.to_bytes());

        buf.put_u32_le(self.fields.len() as u32);
        for (key, value) in &self.fields {
            put_chunk(&mut buf, key.as_bytes());
            put_chunk(&mut buf, value);
        }

        buf.put_u32_le(self.events.len() as u32);
        for event in &self.events {
            put_chunk(&mut buf, event);
        }

        buf.freeze()
    }

    /// Parse a record from bytes
    pub fn decode(data: &[u8]) -> ShoalResult<Self> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(ShoalError::BufferTooShort {
                expected: MIN_RECORD_SIZE,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let epoch = Epoch::new(buf.get_i64_le());

        let field_count = take_count(&mut buf)?;
        let mut fields = FieldMap::new();
        for _ in 0..field_count {
            let key = take_chunk(&mut buf)?;
            let key = std::str::from_utf8(key).map_err(|_| ShoalError::InvalidFieldKey)?;
            let value = take_chunk(&mut buf)?;
            fields.insert(key.to_string(), Bytes::copy_from_slice(value));
        }

        let event_count = take_count(&mut buf)?;
        let mut events = Vec::with_capacity(event_count.min(buf.remaining() / PREFIX_SIZE));
        for _ in 0..event_count {
            events.push(Bytes::copy_from_slice(take_chunk(&mut buf)?));
        }

        if buf.has_remaining() {
            return Err(ShoalError::TrailingBytes(buf.remaining()));
        }

        Ok(UpdateRecord {
            epoch,
            fields,
            events,
        })
    }
}

fn put_chunk(buf: &mut BytesMut, chunk: &[u8]) {
    buf.put_u32_le(chunk.len() as u32);
    buf.put_slice(chunk);
}

fn take_count(buf: &mut &[u8]) -> ShoalResult<usize> {
    if buf.remaining() < PREFIX_SIZE {
        return Err(ShoalError::BufferTooShort {
            expected: PREFIX_SIZE,
            actual: buf.remaining(),
        });
    }
    Ok(buf.get_u32_le() as usize)
}

fn take_chunk<'a>(buf: &mut &'a [u8]) -> ShoalResult<&'a [u8]> {
    let len = take_count(buf)?;
    if buf.len() < len {
        return Err(ShoalError::BufferTooShort {
            expected: len,
            actual: buf.len(),
        });
    }
    let slice: &'a [u8] = *buf;
    let (chunk, rest) = slice.split_at(len);
    *buf = rest;
    Ok(chunk)
}

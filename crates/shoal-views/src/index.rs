//! Index membership writes

use bytes::Bytes;
use shoal_core::{Epoch, FieldMap, ShoalResult, PRESENT};
use shoal_stream::ReconcilingWriter;

/// Mark `member` present in (or absent from) `index`
pub fn write_to_index(
    writer: &mut ReconcilingWriter,
    index: &str,
    member: &str,
    present: bool,
) -> ShoalResult<Epoch> {
    let value = if present {
        Bytes::from_static(PRESENT)
    } else {
        Bytes::new()
    };

    let mut diff = FieldMap::new();
    diff.insert(member.to_string(), value);
    writer.send(index, &diff, &[])
}

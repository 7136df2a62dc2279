//! RESP2 codec
//!
//! Commands go out as arrays of bulk strings. Replies are decoded
//! incrementally from a growing read buffer: a partial reply leaves the
//! buffer untouched and yields `None` until more bytes arrive.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use shoal_core::{ShoalError, ShoalResult};
use shoal_store::{Command, Reply};

/// Maximum bulk string length accepted from the server (512 MiB)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(command: &Command, out: &mut BytesMut) {
    let args = command.to_args();

    put_header(out, b'*', args.len());
    for arg in &args {
        put_header(out, b'$', arg.len());
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

fn put_header(out: &mut BytesMut, kind: u8, len: usize) {
    out.put_u8(kind);
    out.put_slice(len.to_string().as_bytes());
    out.put_slice(b"\r\n");
}

/// Decode one reply from the front of `buf`, consuming it on success
pub fn decode_reply(buf: &mut BytesMut) -> ShoalResult<Option<Reply>> {
    match parse(buf, 0)? {
        Some((reply, consumed)) => {
            buf.advance(consumed);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

/// Parse a reply starting at `pos`; returns the reply and the end offset
fn parse(buf: &[u8], pos: usize) -> ShoalResult<Option<(Reply, usize)>> {
    let Some((line, next)) = read_line(buf, pos) else {
        return Ok(None);
    };
    let Some((&kind, body)) = line.split_first() else {
        return Err(ShoalError::Protocol("empty reply line".into()));
    };

    match kind {
        b'+' => Ok(Some((Reply::Status(text(body)?), next))),
        b'-' => Ok(Some((Reply::Error(text(body)?), next))),
        b':' => Ok(Some((Reply::Integer(integer(body)?), next))),
        b'$' => {
            let len = integer(body)?;
            if len < 0 {
                return Ok(Some((Reply::Bulk(None), next)));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(ShoalError::Protocol(format!("bulk length {len} too large")));
            }

            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(ShoalError::Protocol("bulk string not terminated".into()));
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((Reply::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let count = integer(body)?;
            if count < 0 {
                return Ok(Some((Reply::Array(None), next)));
            }

            let mut items = Vec::with_capacity((count as usize).min(1024));
            let mut cursor = next;
            for _ in 0..count {
                match parse(buf, cursor)? {
                    Some((item, end)) => {
                        items.push(item);
                        cursor = end;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), cursor)))
        }
        other => Err(ShoalError::Protocol(format!(
            "unknown reply type byte 0x{other:02x}"
        ))),
    }
}

/// Find the CRLF-terminated line at `pos`, returning it and the offset after it
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], pos + idx + 2))
}

fn text(body: &[u8]) -> ShoalResult<String> {
    String::from_utf8(body.to_vec())
        .map_err(|_| ShoalError::Protocol("reply line is not UTF-8".into()))
}

fn integer(body: &[u8]) -> ShoalResult<i64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ShoalError::Protocol(format!("invalid integer {body:?}")))
}

//! Commands and replies exchanged with the backing store
//!
//! The command set is the small subset of a Redis-style key-value store the
//! streaming layer needs: hashes, pub/sub, and MULTI/EXEC transactions.

use bytes::Bytes;
use shoal_core::{ShoalError, ShoalResult};

/// A command sent on a store connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Select the logical database
    Select(u32),
    /// Liveness check
    Ping,
    /// Begin a transaction
    Multi,
    /// Execute the queued transaction
    Exec,
    /// Upsert hash fields
    HSet {
        key: String,
        fields: Vec<(String, Bytes)>,
    },
    /// Delete hash fields
    HDel { key: String, fields: Vec<String> },
    /// Read a whole hash as flat field/value pairs
    HGetAll { key: String },
    /// Publish a payload on a channel
    Publish { channel: String, payload: Bytes },
    /// Subscribe the connection to a channel
    Subscribe { channel: String },
    /// Unsubscribe the connection from a channel
    Unsubscribe { channel: String },
}

impl Command {
    /// Protocol verb
    pub fn name(&self) -> &'static str {
        match self {
            Command::Select(_) => "SELECT",
            Command::Ping => "PING",
            Command::Multi => "MULTI",
            Command::Exec => "EXEC",
            Command::HSet { .. } => "HSET",
            Command::HDel { .. } => "HDEL",
            Command::HGetAll { .. } => "HGETALL",
            Command::Publish { .. } => "PUBLISH",
            Command::Subscribe { .. } => "SUBSCRIBE",
            Command::Unsubscribe { .. } => "UNSUBSCRIBE",
        }
    }

    /// Flatten into protocol arguments (verb first)
    pub fn to_args(&self) -> Vec<Bytes> {
        let mut args = vec![Bytes::from_static(self.name().as_bytes())];

        match self {
            Command::Select(db) => args.push(Bytes::from(db.to_string())),
            Command::Ping | Command::Multi | Command::Exec => {}
            Command::HSet { key, fields } => {
                args.push(Bytes::copy_from_slice(key.as_bytes()));
                for (field, value) in fields {
                    args.push(Bytes::copy_from_slice(field.as_bytes()));
                    args.push(value.clone());
                }
            }
            Command::HDel { key, fields } => {
                args.push(Bytes::copy_from_slice(key.as_bytes()));
                args.extend(fields.iter().map(|f| Bytes::copy_from_slice(f.as_bytes())));
            }
            Command::HGetAll { key } => args.push(Bytes::copy_from_slice(key.as_bytes())),
            Command::Publish { channel, payload } => {
                args.push(Bytes::copy_from_slice(channel.as_bytes()));
                args.push(payload.clone());
            }
            Command::Subscribe { channel } | Command::Unsubscribe { channel } => {
                args.push(Bytes::copy_from_slice(channel.as_bytes()));
            }
        }

        args
    }
}

/// A reply received on a store connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Simple status string (`+OK`)
    Status(String),
    /// Error string (`-ERR ...`)
    Error(String),
    /// Integer
    Integer(i64),
    /// Bulk string, `None` for the null bulk string
    Bulk(Option<Bytes>),
    /// Array, `None` for the null array
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Borrow the payload of a non-null bulk string
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Reply::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Borrow the elements of a non-null array
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Interpret the reply of a hash read as field/value pairs
    pub fn into_pairs(self) -> ShoalResult<Vec<(Bytes, Bytes)>> {
        let items = match self {
            Reply::Array(Some(items)) => items,
            Reply::Array(None) => return Ok(Vec::new()),
            Reply::Error(e) => return Err(ShoalError::Backend(e)),
            other => {
                return Err(ShoalError::UnexpectedReply {
                    command: "HGETALL",
                    reply: format!("{other:?}"),
                })
            }
        };

        if items.len() % 2 != 0 {
            return Err(ShoalError::Protocol(format!(
                "hash reply has odd element count {}",
                items.len()
            )));
        }

        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            match (field, value) {
                (Reply::Bulk(Some(field)), Reply::Bulk(Some(value))) => pairs.push((field, value)),
                (field, value) => {
                    return Err(ShoalError::UnexpectedReply {
                        command: "HGETALL",
                        reply: format!("{field:?} {value:?}"),
                    })
                }
            }
        }

        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hset_args() {
        let cmd = Command::HSet {
            key: "e1".into(),
            fields: vec![("x".into(), Bytes::from_static(b"1"))],
        };
        let args = cmd.to_args();
        assert_eq!(args.len(), 4);
        assert_eq!(args[0].as_ref(), b"HSET");
        assert_eq!(args[1].as_ref(), b"e1");
        assert_eq!(args[3].as_ref(), b"1");
    }

    #[test]
    fn test_select_args() {
        let args = Command::Select(1).to_args();
        assert_eq!(args, vec![Bytes::from_static(b"SELECT"), Bytes::from_static(b"1")]);
    }

    #[test]
    fn test_into_pairs() {
        let reply = Reply::Array(Some(vec![
            Reply::bulk(&b"x"[..]),
            Reply::bulk(&b"1"[..]),
            Reply::bulk(&b"y"[..]),
            Reply::bulk(&b"2"[..]),
        ]));
        let pairs = reply.into_pairs().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0.as_ref(), b"y");
    }

    #[test]
    fn test_into_pairs_rejects_odd_and_errors() {
        let odd = Reply::Array(Some(vec![Reply::bulk(&b"x"[..])]));
        assert!(matches!(odd.into_pairs(), Err(ShoalError::Protocol(_))));

        let err = Reply::Error("ERR wrong type".into());
        assert!(matches!(err.into_pairs(), Err(ShoalError::Backend(_))));

        let status = Reply::ok();
        assert!(matches!(
            status.into_pairs(),
            Err(ShoalError::UnexpectedReply { .. })
        ));
    }
}

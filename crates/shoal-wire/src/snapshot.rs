//! Snapshot - the canonical field hash of an entity
//!
//! The hash carries user fields plus the reserved `_epoch` field stamped by
//! the last write batch. The epoch is split out here and never surfaces as
//! user data.

use bytes::Bytes;
use shoal_core::{is_tombstone, Epoch, FieldMap, EPOCH_FIELD};

/// Parsed field hash
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// User fields
    pub fields: FieldMap,
    /// Epoch of the last batch applied to the hash, if stamped and well-formed
    pub epoch: Option<Epoch>,
    /// Fields dropped because their name was not valid UTF-8
    pub invalid_fields: usize,
}

impl Snapshot {
    /// Build a snapshot from the flat field/value pairs of a hash read.
    ///
    /// Fields whose name is not valid UTF-8 are skipped, the same way a
    /// malformed log record is skipped.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Bytes, Bytes)>,
    {
        let mut snapshot = Snapshot::default();

        for (field, value) in pairs {
            let Ok(field) = std::str::from_utf8(&field) else {
                snapshot.invalid_fields += 1;
                tracing::warn!(len = field.len(), "skipping snapshot field with non-UTF-8 name");
                continue;
            };

            if field == EPOCH_FIELD {
                snapshot.epoch = Epoch::from_slice(&value);
            } else if !is_tombstone(&value) {
                snapshot.fields.insert(field.to_string(), value);
            }
        }

        snapshot
    }

    /// Check if the hash held no user fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(k: &'static str, v: &[u8]) -> (Bytes, Bytes) {
        (Bytes::from_static(k.as_bytes()), Bytes::copy_from_slice(v))
    }

    #[test]
    fn test_snapshot_splits_epoch() {
        let snapshot = Snapshot::from_pairs(vec![
            pair("x", b"1"),
            pair("_epoch", &42i64.to_le_bytes()),
        ]);

        assert_eq!(snapshot.epoch, Some(Epoch::new(42)));
        assert_eq!(snapshot.fields.len(), 1);
        assert!(!snapshot.fields.contains_key(EPOCH_FIELD));
    }

    #[test]
    fn test_snapshot_malformed_epoch_is_ignored() {
        let snapshot =
            Snapshot::from_pairs(vec![pair("_epoch", b"short"), pair("y", b"2")]);
        assert_eq!(snapshot.epoch, None);
        assert_eq!(snapshot.fields.len(), 1);
    }

    #[test]
    fn test_snapshot_empty_hash() {
        let snapshot = Snapshot::from_pairs(Vec::new());
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.epoch, None);
    }

    #[test]
    fn test_snapshot_skips_invalid_field_name() {
        let snapshot = Snapshot::from_pairs(vec![
            (Bytes::from_static(&[0xFF, 0xFE]), Bytes::from_static(b"1")),
            pair("x", b"2"),
            pair("_epoch", &7i64.to_le_bytes()),
        ]);

        assert_eq!(snapshot.invalid_fields, 1);
        assert_eq!(snapshot.fields.len(), 1);
        assert_eq!(snapshot.fields["x"].as_ref(), b"2");
        assert_eq!(snapshot.epoch, Some(Epoch::new(7)));
    }
}

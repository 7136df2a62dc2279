//! Field maps - the unit of entity state
//!
//! A field map is a string-keyed collection of byte values. A zero-length
//! value is a tombstone: it means "field deleted", never "field set to empty".

use std::collections::BTreeMap;

use bytes::Bytes;

/// Reserved hash field holding the epoch of the last applied write batch
pub const EPOCH_FIELD: &str = "_epoch";

/// String-keyed byte values
pub type FieldMap = BTreeMap<String, Bytes>;

/// Value written to an index field to mark a member present
pub const PRESENT: &[u8] = &[1];

/// Check whether a field value is a tombstone
#[inline]
pub fn is_tombstone(value: &[u8]) -> bool {
    value.is_empty()
}

/// Check whether a field name is reserved for protocol use
#[inline]
pub fn is_reserved(field: &str) -> bool {
    field == EPOCH_FIELD
}

/// Apply a field diff to state: tombstones delete, everything else upserts
pub fn apply_diff(state: &mut FieldMap, diff: &FieldMap) {
    for (key, value) in diff {
        apply_field(state, key, value);
    }
}

/// Apply a single field change
#[inline]
pub fn apply_field(state: &mut FieldMap, key: &str, value: &Bytes) {
    if is_tombstone(value) {
        state.remove(key);
    } else {
        state.insert(key.to_string(), value.clone());
    }
}

/// Check index membership: present iff the field exists with a non-empty value
pub fn is_present(index: &FieldMap, member: &str) -> bool {
    index.get(member).is_some_and(|v| !is_tombstone(v))
}

/// Iterate the present members of an index
pub fn present_members(index: &FieldMap) -> impl Iterator<Item = &str> {
    index
        .iter()
        .filter(|(_, v)| !is_tombstone(v))
        .map(|(k, _)| k.as_str())
}

/// Read an f64 stored as 8 little-endian bytes
pub fn read_f64(fields: &FieldMap, key: &str) -> Option<f64> {
    let bytes: [u8; 8] = fields.get(key)?.as_ref().try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}

/// Encode an f64 as 8 little-endian bytes
pub fn f64_value(value: f64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_diff_tombstone_deletes() {
        let mut state = FieldMap::new();
        state.insert("x".into(), Bytes::from_static(b"1"));
        state.insert("y".into(), Bytes::from_static(b"2"));

        let mut diff = FieldMap::new();
        diff.insert("x".into(), Bytes::new());
        diff.insert("z".into(), Bytes::from_static(b"3"));

        apply_diff(&mut state, &diff);

        assert!(!state.contains_key("x"));
        assert_eq!(state.get("y").unwrap().as_ref(), b"2");
        assert_eq!(state.get("z").unwrap().as_ref(), b"3");
    }

    #[test]
    fn test_presence() {
        let mut index = FieldMap::new();
        index.insert("e1".into(), Bytes::from_static(PRESENT));
        index.insert("e2".into(), Bytes::new());

        assert!(is_present(&index, "e1"));
        assert!(!is_present(&index, "e2"));
        assert!(!is_present(&index, "e3"));
        assert_eq!(present_members(&index).collect::<Vec<_>>(), vec!["e1"]);
    }

    #[test]
    fn test_f64_fields() {
        let mut fields = FieldMap::new();
        fields.insert("vx".into(), f64_value(1.0));
        fields.insert("bad".into(), Bytes::from_static(b"abc"));

        assert_eq!(read_f64(&fields, "vx"), Some(1.0));
        assert_eq!(read_f64(&fields, "bad"), None);
        assert_eq!(read_f64(&fields, "missing"), None);
    }

    #[test]
    fn test_reserved() {
        assert!(is_reserved("_epoch"));
        assert!(!is_reserved("epoch"));
    }
}

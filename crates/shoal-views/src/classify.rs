//! Classifiers - pure functions from an entity's fields to index keys
//!
//! Classifiers must be deterministic and hold no hidden state: the same
//! field map always yields the same keys, on every process.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use shoal_core::{read_f64, FieldMap};

/// Maps fields to a set of index keys (read participation or read dependencies)
pub trait ReadIndexClassifier: Send + Sync {
    fn classify(&self, fields: &FieldMap) -> BTreeSet<String>;
}

/// Maps fields to the single authority index key
pub trait WriteIndexClassifier: Send + Sync {
    fn classify(&self, fields: &FieldMap) -> String;
}

impl<F> ReadIndexClassifier for F
where
    F: Fn(&FieldMap) -> BTreeSet<String> + Send + Sync,
{
    fn classify(&self, fields: &FieldMap) -> BTreeSet<String> {
        self(fields)
    }
}

impl<F> WriteIndexClassifier for F
where
    F: Fn(&FieldMap) -> String + Send + Sync,
{
    fn classify(&self, fields: &FieldMap) -> String {
        self(fields)
    }
}

/// The three classifiers every entity view is built with
#[derive(Clone)]
pub struct Classifiers {
    /// Indexes the entity should be discoverable under
    pub read_index: Arc<dyn ReadIndexClassifier>,
    /// Indexes the owner must track to see what the entity depends on
    pub read_dependency: Arc<dyn ReadIndexClassifier>,
    /// Index that grants write authority over the entity
    pub write_index: Arc<dyn WriteIndexClassifier>,
}

impl Classifiers {
    pub fn new(
        read_index: impl ReadIndexClassifier + 'static,
        read_dependency: impl ReadIndexClassifier + 'static,
        write_index: impl WriteIndexClassifier + 'static,
    ) -> Self {
        Classifiers {
            read_index: Arc::new(read_index),
            read_dependency: Arc::new(read_dependency),
            write_index: Arc::new(write_index),
        }
    }

    /// Grid bucketing for both reads and writes, with read dependencies
    /// equal to read participation
    pub fn grid(cell_size: f64) -> Self {
        let read = GridClassifier::new("readIndex", cell_size, "readIndex-north");
        Classifiers::new(
            read.clone(),
            read,
            GridClassifier::new("writeIndex", cell_size, "writeIndex-1"),
        )
    }

    /// Run all three classifiers
    pub fn classify(&self, fields: &FieldMap) -> Classification {
        Classification {
            read_indexes: self.read_index.classify(fields),
            read_dependencies: self.read_dependency.classify(fields),
            write_index: self.write_index.classify(fields),
        }
    }
}

impl fmt::Debug for Classifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifiers").finish_non_exhaustive()
    }
}

/// Cached classifier output for one entity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub read_indexes: BTreeSet<String>,
    pub read_dependencies: BTreeSet<String>,
    pub write_index: String,
}

/// Buckets `(x, y)` coordinates into square cells.
///
/// Keys look like `"<prefix>:<cx>,<cy>"` where each coordinate is divided by
/// the cell size and truncated toward zero. Entities without both
/// coordinates fall back to a fixed key.
#[derive(Clone, Debug, PartialEq)]
pub struct GridClassifier {
    pub prefix: String,
    pub cell_size: f64,
    pub fallback: String,
}

impl GridClassifier {
    pub fn new(prefix: impl Into<String>, cell_size: f64, fallback: impl Into<String>) -> Self {
        GridClassifier {
            prefix: prefix.into(),
            cell_size,
            fallback: fallback.into(),
        }
    }

    /// Cell key for a field map
    pub fn cell_key(&self, fields: &FieldMap) -> String {
        match (read_f64(fields, "x"), read_f64(fields, "y")) {
            (Some(x), Some(y)) => {
                let cx = (x / self.cell_size).trunc() as i64;
                let cy = (y / self.cell_size).trunc() as i64;
                format!("{}:{},{}", self.prefix, cx, cy)
            }
            _ => self.fallback.clone(),
        }
    }
}

impl ReadIndexClassifier for GridClassifier {
    fn classify(&self, fields: &FieldMap) -> BTreeSet<String> {
        BTreeSet::from([self.cell_key(fields)])
    }
}

impl WriteIndexClassifier for GridClassifier {
    fn classify(&self, fields: &FieldMap) -> String {
        self.cell_key(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::f64_value;

    fn position(x: f64, y: f64) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("x".into(), f64_value(x));
        fields.insert("y".into(), f64_value(y));
        fields
    }

    #[test]
    fn test_grid_buckets() {
        let grid = GridClassifier::new("writeIndex", 10.0, "writeIndex-1");
        assert_eq!(grid.cell_key(&position(0.0, 0.0)), "writeIndex:0,0");
        assert_eq!(grid.cell_key(&position(19.9, 35.0)), "writeIndex:1,3");
        assert_eq!(grid.cell_key(&position(-5.0, -12.0)), "writeIndex:0,-1");
    }

    #[test]
    fn test_grid_fallback() {
        let grid = GridClassifier::new("readIndex", 10.0, "readIndex-north");
        let mut fields = FieldMap::new();
        fields.insert("x".into(), f64_value(3.0));
        assert_eq!(
            ReadIndexClassifier::classify(&grid, &fields),
            BTreeSet::from(["readIndex-north".to_string()])
        );
    }

    #[test]
    fn test_closure_classifiers() {
        let classifiers = Classifiers::new(
            |fields: &FieldMap| fields.keys().cloned().collect::<BTreeSet<_>>(),
            |_: &FieldMap| BTreeSet::new(),
            |_: &FieldMap| "authority".to_string(),
        );

        let classification = classifiers.classify(&position(1.0, 1.0));
        assert_eq!(classification.read_indexes.len(), 2);
        assert!(classification.read_dependencies.is_empty());
        assert_eq!(classification.write_index, "authority");
    }

    #[test]
    fn test_grid_preset() {
        let classification = Classifiers::grid(10.0).classify(&position(12.0, 3.0));
        assert_eq!(classification.write_index, "writeIndex:1,0");
        assert!(classification.read_dependencies.contains("readIndex:1,0"));
    }
}

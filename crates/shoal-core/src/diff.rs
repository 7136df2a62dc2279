//! Set diffing - "what was added, what was removed" relative to a previous set

use std::collections::BTreeSet;

/// Difference between a previous and a desired set of keys.
///
/// Both lists are sorted and free of duplicates; the order of the inputs
/// does not matter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SetDiff {
    /// Compute the difference between `previous` and `desired`
    pub fn between<'p, 'd, P, D>(previous: P, desired: D) -> Self
    where
        P: IntoIterator<Item = &'p str>,
        D: IntoIterator<Item = &'d str>,
    {
        let previous: BTreeSet<&str> = previous.into_iter().collect();
        let desired: BTreeSet<&str> = desired.into_iter().collect();

        SetDiff {
            added: desired
                .difference(&previous)
                .map(|s| s.to_string())
                .collect(),
            removed: previous
                .difference(&desired)
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Check if nothing changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_diff_basic() {
        let diff = SetDiff::between(["a", "b", "c"], ["b", "c", "d"]);
        assert_eq!(diff.added, vec!["d"]);
        assert_eq!(diff.removed, vec!["a"]);
    }

    #[test]
    fn test_set_diff_order_and_duplicates_irrelevant() {
        let diff = SetDiff::between(["c", "a", "a"], ["a", "c", "c"]);
        assert!(diff.is_empty());
    }

    proptest! {
        #[test]
        fn prop_applying_diff_yields_desired(
            previous in proptest::collection::btree_set("[a-e]{1,2}", 0..8),
            desired in proptest::collection::btree_set("[a-e]{1,2}", 0..8),
        ) {
            let diff = SetDiff::between(
                previous.iter().map(String::as_str),
                desired.iter().map(String::as_str),
            );

            let mut result = previous.clone();
            for key in &diff.removed {
                prop_assert!(result.remove(key));
            }
            for key in &diff.added {
                prop_assert!(result.insert(key.clone()));
            }
            prop_assert_eq!(result, desired);
        }
    }
}

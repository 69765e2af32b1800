//! State values: the machine's current position.
//!
//! A state value is either a single key (`"heyed"`) or a nested map for
//! compound states (`{"review": "pending"}`). The engine treats values as
//! opaque apart from resolution against a chart and prefix matching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a machine, as it appears on the wire.
///
/// # Example
///
/// ```rust
/// use diachronic::core::StateValue;
///
/// let value = StateValue::from_path(&["review".to_string(), "pending".to_string()]).unwrap();
/// assert!(value.matches("review"));
/// assert!(value.matches("review.pending"));
/// assert!(!value.matches("done"));
/// assert_eq!(value.to_string(), "review.pending");
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// A leaf state directly under its parent
    Atomic(String),
    /// One entry per active child region (a single entry for compound states)
    Compound(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Build a value from a root-relative path of state keys.
    ///
    /// Returns `None` for an empty path, which names the machine root and
    /// has no value representation.
    pub fn from_path(path: &[String]) -> Option<Self> {
        let (head, rest) = path.split_first()?;
        match Self::from_path(rest) {
            None => Some(Self::Atomic(head.clone())),
            Some(child) => {
                let mut map = BTreeMap::new();
                map.insert(head.clone(), child);
                Some(Self::Compound(map))
            }
        }
    }

    /// All root-to-leaf key paths described by this value.
    pub fn leaf_paths(&self) -> Vec<Vec<String>> {
        match self {
            Self::Atomic(key) => vec![vec![key.clone()]],
            Self::Compound(children) => children
                .iter()
                .flat_map(|(key, child)| {
                    child.leaf_paths().into_iter().map(move |mut path| {
                        path.insert(0, key.clone());
                        path
                    })
                })
                .collect(),
        }
    }

    /// Check whether the value is in (or below) the dotted state path.
    pub fn matches(&self, dotted: &str) -> bool {
        let wanted: Vec<&str> = dotted.split('.').collect();
        self.leaf_paths().iter().any(|path| {
            path.len() >= wanted.len() && path.iter().zip(&wanted).all(|(have, want)| have == want)
        })
    }
}

impl From<&str> for StateValue {
    fn from(key: &str) -> Self {
        Self::Atomic(key.to_string())
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .leaf_paths()
            .into_iter()
            .map(|path| path.join("."))
            .collect();
        match rendered.as_slice() {
            [single] => write!(f, "{single}"),
            many => write!(f, "{{{}}}", many.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn from_path_builds_atomic_for_single_key() {
        let value = StateValue::from_path(&path(&["heyed"])).unwrap();
        assert_eq!(value, StateValue::Atomic("heyed".to_string()));
    }

    #[test]
    fn from_path_nests_compound_states() {
        let value = StateValue::from_path(&path(&["a", "b", "c"])).unwrap();
        assert_eq!(serde_json::to_value(&value).unwrap(), json!({"a": {"b": "c"}}));
    }

    #[test]
    fn empty_path_has_no_value() {
        assert!(StateValue::from_path(&[]).is_none());
    }

    #[test]
    fn deserializes_both_shapes() {
        let atomic: StateValue = serde_json::from_value(json!("initial")).unwrap();
        assert_eq!(atomic, StateValue::from("initial"));

        let nested: StateValue = serde_json::from_value(json!({"a": "b"})).unwrap();
        assert_eq!(nested.leaf_paths(), vec![path(&["a", "b"])]);
    }

    #[test]
    fn rejects_non_state_shapes() {
        assert!(serde_json::from_value::<StateValue>(json!(42)).is_err());
        assert!(serde_json::from_value::<StateValue>(json!(["a"])).is_err());
    }

    #[test]
    fn matches_checks_prefixes() {
        let value = StateValue::from_path(&path(&["a", "b"])).unwrap();
        assert!(value.matches("a"));
        assert!(value.matches("a.b"));
        assert!(!value.matches("a.b.c"));
        assert!(!value.matches("b"));
    }

    #[test]
    fn display_renders_parallel_regions() {
        let value: StateValue =
            serde_json::from_value(json!({"left": "on", "right": "off"})).unwrap();
        assert_eq!(value.to_string(), "{left.on, right.off}");
    }
}

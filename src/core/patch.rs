//! Structural diff and deep-merge patching of configuration trees.
//!
//! - [`diff`]: objects are compared key by key, arrays as unordered multisets
//! - [`apply`]: objects merge recursively, everything else is replaced

use crate::models::ConfigTree;
use crate::utils::hash::canonical_json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Old and new value at one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old_value: Value,
    pub new_value: Value,
}

/// Differences between two configuration trees, keyed by path
/// (`root['ntp']['servers']`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffTree {
    /// Object keys present only in the new tree.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub added: BTreeMap<String, Value>,
    /// Object keys present only in the old tree.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub removed: BTreeMap<String, Value>,
    /// Scalars or mismatched types that differ.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed: BTreeMap<String, ValueChange>,
    /// Array elements only in the new tree, indexed by new position.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub items_added: BTreeMap<String, Value>,
    /// Array elements only in the old tree, indexed by old position.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub items_removed: BTreeMap<String, Value>,
}

impl DiffTree {
    /// True when the trees were structurally identical.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.items_added.is_empty()
            && self.items_removed.is_empty()
    }

    /// Total number of reported differences.
    pub fn len(&self) -> usize {
        self.added.len()
            + self.removed.len()
            + self.changed.len()
            + self.items_added.len()
            + self.items_removed.len()
    }

    /// Plain nested JSON; an empty diff is `{}`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// Compute the structural diff between two trees.
pub fn diff(before: &ConfigTree, after: &ConfigTree) -> DiffTree {
    let mut tree = DiffTree::default();
    diff_at("root", before, after, &mut tree);
    tree
}

fn diff_at(path: &str, before: &Value, after: &Value, tree: &mut DiffTree) {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, old_value) in old {
                let child = child_key(path, key);
                match new.get(key) {
                    Some(new_value) => diff_at(&child, old_value, new_value, tree),
                    None => {
                        tree.removed.insert(child, old_value.clone());
                    }
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    tree.added.insert(child_key(path, key), new_value.clone());
                }
            }
        }
        (Value::Array(old), Value::Array(new)) => diff_multiset(path, old, new, tree),
        (old, new) => {
            if old != new {
                tree.changed.insert(
                    path.to_string(),
                    ValueChange {
                        old_value: old.clone(),
                        new_value: new.clone(),
                    },
                );
            }
        }
    }
}

/// Report the elements whose multiplicity differs between two arrays.
fn diff_multiset(path: &str, old: &[Value], new: &[Value], tree: &mut DiffTree) {
    let old_keys: Vec<String> = old.iter().map(canonical_json).collect();
    let new_keys: Vec<String> = new.iter().map(canonical_json).collect();

    let mut old_counts: HashMap<&str, usize> = HashMap::new();
    for key in &old_keys {
        *old_counts.entry(key.as_str()).or_default() += 1;
    }
    let mut new_counts: HashMap<&str, usize> = HashMap::new();
    for key in &new_keys {
        *new_counts.entry(key.as_str()).or_default() += 1;
    }

    // Surplus occurrences on each side; the first matching positions absorb
    // the shared count.
    let mut shared = old_counts;
    for (i, key) in new_keys.iter().enumerate() {
        match shared.get_mut(key.as_str()) {
            Some(n) if *n > 0 => *n -= 1,
            _ => {
                tree.items_added.insert(child_index(path, i), new[i].clone());
            }
        }
    }

    let mut shared = new_counts;
    for (i, key) in old_keys.iter().enumerate() {
        match shared.get_mut(key.as_str()) {
            Some(n) if *n > 0 => *n -= 1,
            _ => {
                tree.items_removed.insert(child_index(path, i), old[i].clone());
            }
        }
    }
}

fn child_key(path: &str, key: &str) -> String {
    format!("{}['{}']", path, key.replace('\'', "\\'"))
}

fn child_index(path: &str, index: usize) -> String {
    format!("{}[{}]", path, index)
}

/// Deep-merge `patch` onto `base`.
///
/// When both sides hold an object under a key the merge recurses; in every
/// other case the patch value replaces the base value, arrays included.
/// Keys missing from the patch are kept. `base` is never modified.
pub fn apply(base: &ConfigTree, patch: &ConfigTree) -> ConfigTree {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, patch_value) in patch_map {
                let value = match merged.get(key) {
                    Some(base_value @ Value::Object(_)) if patch_value.is_object() => {
                        apply(base_value, patch_value)
                    }
                    _ => patch_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_config() -> Value {
        json!({
            "system": {"hostname": "fw-1", "login_timeout_minutes": 0},
            "ntp": {"servers": ["pool.ntp.org", "time.google.com"], "timezone": "UTC", "enabled": true},
            "firewall_rules": [
                {"name": "Allow-LAN-to-WAN", "action": "allow"},
                {"name": "Block-WAN-to-LAN", "action": "deny"}
            ]
        })
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let config = sample_config();
        let d = diff(&config, &config);
        assert!(d.is_empty());
        assert_eq!(d.to_value(), json!({}));
    }

    #[test]
    fn test_diff_ignores_array_order() {
        let before = json!({"dns": {"servers": ["8.8.8.8", "8.8.4.4"]}});
        let after = json!({"dns": {"servers": ["8.8.4.4", "8.8.8.8"]}});
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn test_diff_reports_array_membership() {
        let before = json!({"servers": ["8.8.8.8"]});
        let after = json!({"servers": ["1.1.1.1"]});
        let d = diff(&before, &after);
        assert_eq!(d.items_added.get("root['servers'][0]"), Some(&json!("1.1.1.1")));
        assert_eq!(d.items_removed.get("root['servers'][0]"), Some(&json!("8.8.8.8")));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_diff_counts_duplicates() {
        let before = json!(["a", "b"]);
        let after = json!(["b", "a", "a"]);
        let d = diff(&before, &after);
        assert_eq!(d.items_added.len(), 1);
        assert_eq!(d.items_added.get("root[2]"), Some(&json!("a")));
        assert!(d.items_removed.is_empty());
    }

    #[test]
    fn test_diff_keys_and_values() {
        let before = json!({"a": 1, "b": {"c": true}, "gone": "x"});
        let after = json!({"a": 2, "b": {"c": true, "d": null}, "new": [1]});
        let d = diff(&before, &after);

        assert_eq!(
            d.changed.get("root['a']"),
            Some(&ValueChange { old_value: json!(1), new_value: json!(2) })
        );
        assert_eq!(d.added.get("root['b']['d']"), Some(&Value::Null));
        assert_eq!(d.added.get("root['new']"), Some(&json!([1])));
        assert_eq!(d.removed.get("root['gone']"), Some(&json!("x")));
    }

    #[test]
    fn test_diff_type_change_is_a_change() {
        let d = diff(&json!({"a": {"b": 1}}), &json!({"a": "flat"}));
        assert_eq!(d.changed.len(), 1);
        assert!(d.changed.contains_key("root['a']"));
    }

    #[test]
    fn test_apply_preserves_unchanged_fields() {
        let before = json!({"servers": ["pool.ntp.org"], "timezone": "UTC", "enabled": true});
        let after = apply(&before, &json!({"servers": ["10.0.0.1"]}));
        assert_eq!(after["servers"], json!(["10.0.0.1"]));
        assert_eq!(after["timezone"], json!("UTC"));
        assert_eq!(after["enabled"], json!(true));
    }

    #[test]
    fn test_apply_merges_nested_objects() {
        let base = sample_config();
        let merged = apply(&base, &json!({"system": {"hostname": "fw-renamed"}}));
        assert_eq!(merged["system"]["hostname"], json!("fw-renamed"));
        assert_eq!(merged["system"]["login_timeout_minutes"], json!(0));
        assert_eq!(merged["ntp"], base["ntp"]);
    }

    #[test]
    fn test_apply_replaces_lists_wholesale() {
        let base = sample_config();
        let patch = json!({"firewall_rules": [{"name": "Deny-All", "action": "deny"}]});
        let merged = apply(&base, &patch);
        assert_eq!(merged["firewall_rules"], patch["firewall_rules"]);
    }

    #[test]
    fn test_apply_type_mismatch_replaces() {
        let merged = apply(&json!({"a": 5}), &json!({"a": {"nested": true}}));
        assert_eq!(merged, json!({"a": {"nested": true}}));

        let merged = apply(&json!({"a": {"nested": true}}), &json!({"a": 5}));
        assert_eq!(merged, json!({"a": 5}));
    }

    #[test]
    fn test_apply_onto_empty_yields_patch() {
        let patch = json!({"servers": ["10.0.0.50"], "nested": {"k": "v"}});
        assert_eq!(apply(&json!({}), &patch), patch);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let base = sample_config();
        let patch = json!({"ntp": {"servers": ["10.0.0.1"], "enabled": false}, "extra": {"x": [1, 2]}});
        let once = apply(&base, &patch);
        let twice = apply(&once, &patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_does_not_mutate_base() {
        let base = sample_config();
        let copy = base.clone();
        let _ = apply(&base, &json!({"ntp": {"enabled": false}}));
        assert_eq!(base, copy);
    }

    #[test]
    fn test_diff_of_apply_matches_patch() {
        let base = json!({"ntp": {"servers": ["a"], "timezone": "UTC"}});
        let after = apply(&base, &json!({"ntp": {"timezone": "CET"}}));
        let d = diff(&base, &after);
        assert_eq!(d.len(), 1);
        assert!(d.changed.contains_key("root['ntp']['timezone']"));
    }
}

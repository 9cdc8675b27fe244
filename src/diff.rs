use std::collections::BTreeMap;

use serde_json::Value;

use crate::{Result, model::Record};

/// One differing leaf: the value the caller tried to write and the value
/// found on the other side. Both sides are deep copies, safe to retain.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub from: Value,
    pub to: Value,
}

/// Field-path-keyed differences, dotted for nesting (`profile.name`,
/// `items.2.sku`).
pub type ChangeSet = BTreeMap<String, Change>;

/// Structural comparison walker. Stateful per statement and resettable so
/// a chained conflict handler can re-diff without reallocating.
#[derive(Debug, Default)]
pub struct DiffReporter {
    path: Vec<String>,
    changes: ChangeSet,
}

impl DiffReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) -> &mut Self {
        self.path.clear();
        self.changes.clear();
        self
    }

    /// Walk both values and record every differing leaf.
    pub fn compare(&mut self, from: &Value, to: &Value) {
        self.walk(from, to);
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn walk(&mut self, from: &Value, to: &Value) {
        match (from, to) {
            (Value::Object(a), Value::Object(b)) => {
                let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    let left = a.get(key).unwrap_or(&Value::Null);
                    let right = b.get(key).unwrap_or(&Value::Null);
                    self.path.push(key.clone());
                    self.walk(left, right);
                    self.path.pop();
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                let len = a.len().max(b.len());
                for index in 0..len {
                    let left = a.get(index).unwrap_or(&Value::Null);
                    let right = b.get(index).unwrap_or(&Value::Null);
                    self.path.push(index.to_string());
                    self.walk(left, right);
                    self.path.pop();
                }
            }
            (left, right) => {
                if left != right {
                    self.report(left.clone(), right.clone());
                }
            }
        }
    }

    fn report(&mut self, from: Value, to: Value) {
        self.changes.insert(self.path.join("."), Change { from, to });
    }
}

/// Diff two same-type records through their JSON projections.
pub fn diff_records(from: &dyn Record, to: &dyn Record) -> Result<ChangeSet> {
    let mut reporter = DiffReporter::new();
    reporter.compare(&from.to_json()?, &to.to_json()?);
    Ok(reporter.into_changes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reports_scalar_differences_by_field_path() {
        let mut reporter = DiffReporter::new();
        reporter.compare(
            &json!({"description": "qux", "version": 1, "enabled": true}),
            &json!({"description": "bar", "version": 2, "enabled": true}),
        );

        let changes = reporter.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes["description"],
            Change {
                from: json!("qux"),
                to: json!("bar")
            }
        );
        assert_eq!(
            changes["version"],
            Change {
                from: json!(1),
                to: json!(2)
            }
        );
    }

    #[test]
    fn nested_paths_are_dotted() {
        let mut reporter = DiffReporter::new();
        reporter.compare(
            &json!({"profile": {"name": "a", "tags": ["x", "y"]}}),
            &json!({"profile": {"name": "b", "tags": ["x", "z"]}}),
        );

        let changes = reporter.changes();
        assert!(changes.contains_key("profile.name"));
        assert!(changes.contains_key("profile.tags.1"));
        assert!(!changes.contains_key("profile.tags.0"));
    }

    #[test]
    fn missing_keys_diff_against_null() {
        let mut reporter = DiffReporter::new();
        reporter.compare(&json!({"a": 1}), &json!({"a": 1, "b": 2}));
        assert_eq!(
            reporter.changes()["b"],
            Change {
                from: Value::Null,
                to: json!(2)
            }
        );
    }

    #[test]
    fn reset_clears_state_for_reuse() {
        let mut reporter = DiffReporter::new();
        reporter.compare(&json!({"a": 1}), &json!({"a": 2}));
        assert!(!reporter.is_empty());
        reporter.reset();
        assert!(reporter.is_empty());
        reporter.compare(&json!({"b": 1}), &json!({"b": 1}));
        assert!(reporter.is_empty());
    }
}

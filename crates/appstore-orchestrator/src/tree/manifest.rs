// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Total accessors over untyped manifests.
//!
//! Every lookup checks presence and type before descending. A missing key or
//! a value of the wrong type yields [`Node::Missing`], which reads as an empty
//! string, no number, or an empty list.

use serde_json::{Map, Number, Value};

/// A position inside a manifest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Node<'a> {
    Missing,
    String(&'a str),
    Number(&'a Number),
    Bool(bool),
    Array(&'a [Value]),
    Object(&'a Map<String, Value>),
}

impl<'a> Node<'a> {
    /// Wrap a JSON value. `null` is treated as missing.
    pub fn of(value: &'a Value) -> Self {
        match value {
            Value::Null => Node::Missing,
            Value::String(s) => Node::String(s),
            Value::Number(n) => Node::Number(n),
            Value::Bool(b) => Node::Bool(*b),
            Value::Array(items) => Node::Array(items),
            Value::Object(map) => Node::Object(map),
        }
    }

    /// Child `key` of an object.
    pub fn get(self, key: &str) -> Node<'a> {
        match self {
            Node::Object(map) => map.get(key).map(Node::of).unwrap_or(Node::Missing),
            _ => Node::Missing,
        }
    }

    /// Descend through `keys`.
    pub fn path(self, keys: &[&str]) -> Node<'a> {
        keys.iter().fold(self, |node, key| node.get(key))
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Node::Missing)
    }

    /// String value, or `""`.
    pub fn str(self) -> &'a str {
        match self {
            Node::String(s) => s,
            _ => "",
        }
    }

    /// Integer value.
    pub fn i64(self) -> Option<i64> {
        match self {
            Node::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    /// Array elements, or an empty slice.
    pub fn items(self) -> &'a [Value] {
        match self {
            Node::Array(items) => items,
            _ => &[],
        }
    }

    /// Underlying value of an object node.
    pub fn object(self) -> Option<&'a Map<String, Value>> {
        match self {
            Node::Object(map) => Some(map),
            _ => None,
        }
    }
}

/// `metadata.name`.
pub fn resource_name(manifest: &Value) -> &str {
    Node::of(manifest).path(&["metadata", "name"]).str()
}

/// `metadata.labels.<key>`.
pub fn label<'a>(manifest: &'a Value, key: &str) -> &'a str {
    Node::of(manifest).path(&["metadata", "labels"]).get(key).str()
}

/// `name` of every element of `list` that has one.
pub fn names(list: Node<'_>) -> Vec<String> {
    list.items()
        .iter()
        .map(|item| Node::of(item).get("name").str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_and_mistyped_lookups_are_empty() {
        let manifest = json!({
            "metadata": {"name": 42, "labels": "not-a-map"},
            "spec": {"containers": {"name": "x"}},
            "status": null
        });
        let root = Node::of(&manifest);
        assert_eq!(resource_name(&manifest), "");
        assert_eq!(label(&manifest, "controller-revision-hash"), "");
        assert!(root.path(&["spec", "containers"]).items().is_empty());
        assert!(root.get("status").is_missing());
        assert_eq!(root.path(&["status", "collisionCount"]).i64(), None);
        assert!(Node::of(&json!("scalar")).get("anything").is_missing());
    }

    #[test]
    fn test_well_formed_lookups() {
        let manifest = json!({
            "metadata": {"name": "web-1", "labels": {"app": "web"}},
            "spec": {"containers": [{"name": "app"}, {"image": "no-name"}, {"name": "sidecar"}]},
            "revision": 3.0
        });
        assert_eq!(resource_name(&manifest), "web-1");
        assert_eq!(label(&manifest, "app"), "web");
        assert_eq!(
            names(Node::of(&manifest).path(&["spec", "containers"])),
            vec!["app", "sidecar"]
        );
        assert_eq!(Node::of(&manifest).get("revision").i64(), Some(3));
    }
}

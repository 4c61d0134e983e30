//! Node domain types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::architecture::Architecture;

/// A worker node handle returned by a connector.
///
/// Properties are free-form and carry the strings used for architecture
/// dispatch, user access tags, and connector-specific deploy hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Name of the connector that owns this node.
    pub connector: String,
    pub architecture: Architecture,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(name: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connector: connector.into(),
            architecture: Architecture::Unknown,
            properties: HashMap::new(),
        }
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Returns a string property, if present and a string.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    /// Access tags restricting which users may see this node.
    ///
    /// A node with no tags is globally visible.
    pub fn access_tags(&self) -> Vec<String> {
        self.properties
            .get("access_tags")
            .and_then(|v| v.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a user holding `user_tags` may see this node.
    ///
    /// A node with no tags is visible to everyone; a user with no tags sees
    /// all nodes; otherwise the tag sets must intersect.
    pub fn visible_to(&self, user_tags: &[String]) -> bool {
        let node_tags = self.access_tags();
        if node_tags.is_empty() || user_tags.is_empty() {
            return true;
        }
        node_tags.iter().any(|tag| user_tags.contains(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged_node(tags: &[&str]) -> Node {
        Node::new("node-1", "local")
            .with_property("access_tags", serde_json::json!(tags))
    }

    #[test]
    fn untagged_node_is_globally_visible() {
        let node = Node::new("node-1", "local");
        assert!(node.visible_to(&["team-a".to_string()]));
        assert!(node.visible_to(&[]));
    }

    #[test]
    fn tagged_node_requires_intersection() {
        let node = tagged_node(&["team-a", "team-b"]);
        assert!(node.visible_to(&["team-b".to_string()]));
        assert!(!node.visible_to(&["team-c".to_string()]));
    }

    #[test]
    fn user_without_tags_sees_all_nodes() {
        let node = tagged_node(&["team-a"]);
        assert!(node.visible_to(&[]));
    }
}

//! Hierarchical Configuration Tree
//!
//! A string-keyed tree of configuration values. Keys at each level are held
//! in a `BTreeMap`, so iteration order is ascending and identical on every
//! rank, which the descriptor table build relies on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A node in the configuration tree.
///
/// Each node carries an optional scalar value and a sorted map of named
/// children. Descriptor configuration uses one child per key (ENABLED,
/// INTERVAL, STORE, ...) with the scalar holding the setting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTree {
    /// Scalar value at this node, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,

    /// Named children, iterated in ascending key order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<String, ConfigTree>,
}

impl ConfigTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of children at this node.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether this node has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Set the scalar value of the child named `key`, creating it if needed.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let child = self.children.entry(key.into()).or_default();
        child.value = Some(value.into());
        self
    }

    /// Insert (or replace) an entire subtree under `key`.
    pub fn set_subtree(&mut self, key: impl Into<String>, subtree: ConfigTree) -> &mut Self {
        self.children.insert(key.into(), subtree);
        self
    }

    /// Remove all children and the scalar value.
    pub fn clear(&mut self) {
        self.value = None;
        self.children.clear();
    }

    /// Get the subtree under `key`, if present.
    pub fn subtree(&self, key: &str) -> Option<&ConfigTree> {
        self.children.get(key)
    }

    /// Get the scalar value of the child named `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.children.get(key).and_then(|c| c.value.as_deref())
    }

    /// Get the child value as an `i64`, or `default` when the key is absent.
    ///
    /// A present but unparsable value is a configuration error, not a
    /// silent fallback.
    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::ConfigInvalid(format!("{key}={raw} is not an integer"))),
        }
    }

    /// Get the child value as a boolean (0/1), or `default` when absent.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get_i64_or(key, i64::from(default))? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::ConfigInvalid(format!(
                "{key}={other} must be 0 or 1"
            ))),
        }
    }

    /// Get the child value as a string, or `default` when absent.
    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Iterate children in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigTree)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// =============================================================================
// Tests
// =============================================================================

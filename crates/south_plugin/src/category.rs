//! Configuration Categories
//!
//! A category is a named, versioned bundle of configuration items. Item values
//! are kept as strings, the way the management core stores them, and parsed on
//! read with the typed getters.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PluginError, PluginResult};

// ─────────────────────────────────────────────────────────────────────────────
// Config Item
// ─────────────────────────────────────────────────────────────────────────────

/// A single configuration item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    #[serde(default)]
    pub description: String,

    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: String,

    #[serde(default)]
    pub default: String,

    pub value: String,
}

fn default_item_type() -> String {
    "string".to_string()
}

impl ConfigItem {
    /// Create an item whose default and value are the same
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            description: String::new(),
            item_type: default_item_type(),
            default: value.clone(),
            value,
        }
    }

    /// Parse an item from its JSON form.
    ///
    /// Accepts the full item object (`{"value": "5", "type": "integer"}`), an
    /// object carrying only a default, or a bare scalar.
    fn from_json(key: &str, value: &Value) -> PluginResult<Self> {
        match value {
            Value::Object(obj) => {
                let raw = obj
                    .get("value")
                    .or_else(|| obj.get("default"))
                    .ok_or_else(|| {
                        PluginError::InvalidConfig(format!("item '{}' has no value", key))
                    })?;
                let value = scalar_to_string(key, raw)?;
                let default = match obj.get("default") {
                    Some(d) => scalar_to_string(key, d)?,
                    None => value.clone(),
                };
                Ok(Self {
                    description: obj
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    item_type: obj
                        .get("type")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                        .unwrap_or_else(default_item_type),
                    default,
                    value,
                })
            }
            other => Ok(Self::new(scalar_to_string(key, other)?)),
        }
    }
}

fn scalar_to_string(key: &str, value: &Value) -> PluginResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(PluginError::InvalidConfig(format!(
            "item '{}' must be a string, number or boolean",
            key
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Category
// ─────────────────────────────────────────────────────────────────────────────

/// A named, versioned set of configuration items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigCategory {
    /// Category name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Incremented every time a change is applied
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub items: BTreeMap<String, ConfigItem>,
}

/// Item names that differ between two categories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl CategoryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl ConfigCategory {
    /// Create an empty category
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: 0,
            items: BTreeMap::new(),
        }
    }

    /// Add or replace an item value
    pub fn with_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.items.insert(key.into(), ConfigItem::new(value));
        self
    }

    /// Parse a category from a JSON document of items
    pub fn from_json(name: impl Into<String>, json: &str) -> PluginResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| PluginError::InvalidConfig(format!("malformed JSON: {}", e)))?;
        Self::from_value(name, &value)
    }

    /// Build a category from a JSON object of items
    pub fn from_value(name: impl Into<String>, value: &Value) -> PluginResult<Self> {
        let obj = match value {
            Value::Object(obj) => obj,
            Value::Null => return Ok(Self::new(name)),
            _ => {
                return Err(PluginError::InvalidConfig(
                    "configuration must be a JSON object".to_string(),
                ))
            }
        };

        let mut category = Self::new(name);
        for (key, item) in obj {
            category
                .items
                .insert(key.clone(), ConfigItem::from_json(key, item)?);
        }
        Ok(category)
    }

    /// Return a new category with `changes` applied on top of this one.
    ///
    /// Changed items take the new value, unknown items are added and items
    /// absent from `changes` keep their current value. The result carries the
    /// next version number.
    pub fn apply(&self, changes: &ConfigCategory) -> ConfigCategory {
        let mut next = self.clone();
        for (key, item) in &changes.items {
            match next.items.get_mut(key) {
                Some(existing) => existing.value = item.value.clone(),
                None => {
                    next.items.insert(key.clone(), item.clone());
                }
            }
        }
        next.version = self.version + 1;
        next
    }

    /// Compare item values against another category
    pub fn diff(&self, other: &ConfigCategory) -> CategoryDiff {
        let mut diff = CategoryDiff::default();
        for (key, item) in &other.items {
            match self.items.get(key) {
                None => diff.added.push(key.clone()),
                Some(current) if current.value != item.value => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        for key in self.items.keys() {
            if !other.items.contains_key(key) {
                diff.removed.push(key.clone());
            }
        }
        diff
    }

    /// Get the raw string value of an item
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(|item| item.value.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Get an item holding milliseconds as a duration
    ///
    /// Accepts a trailing "ms" suffix ("500ms").
    pub fn get_duration_ms(&self, key: &str) -> Option<Duration> {
        let raw = self.get(key)?.trim();
        let digits = raw.strip_suffix("ms").unwrap_or(raw).trim();
        digits.parse().ok().map(Duration::from_millis)
    }

    /// Typed getter that reports a missing or unparsable item as an error
    pub fn require_u64(&self, key: &str) -> PluginResult<u64> {
        self.get_u64(key).ok_or_else(|| {
            PluginError::InvalidConfig(format!("'{}' must be a non-negative integer", key))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

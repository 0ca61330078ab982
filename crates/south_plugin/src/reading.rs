//! Readings
//!
//! A reading is what a plugin produces: one asset, a set of named datapoints,
//! and the time the values were observed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single datapoint value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatapointValue {
    Integer(i64),
    Float(f64),
    String(String),
}

impl DatapointValue {
    /// Get the value as an f64 if it is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatapointValue::Integer(v) => Some(*v as f64),
            DatapointValue::Float(v) => Some(*v),
            DatapointValue::String(_) => None,
        }
    }
}

impl From<i64> for DatapointValue {
    fn from(v: i64) -> Self {
        DatapointValue::Integer(v)
    }
}

impl From<f64> for DatapointValue {
    fn from(v: f64) -> Self {
        DatapointValue::Float(v)
    }
}

impl From<&str> for DatapointValue {
    fn from(v: &str) -> Self {
        DatapointValue::String(v.to_string())
    }
}

impl From<String> for DatapointValue {
    fn from(v: String) -> Self {
        DatapointValue::String(v)
    }
}

/// A set of datapoints observed for one asset at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Asset the datapoints belong to (e.g., "temperature")
    pub asset: String,

    /// Named datapoint values
    pub datapoints: BTreeMap<String, DatapointValue>,

    /// When the values were observed
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Create an empty reading for an asset, timestamped now
    pub fn new(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            datapoints: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a datapoint
    pub fn with_datapoint(mut self, name: impl Into<String>, value: impl Into<DatapointValue>) -> Self {
        self.datapoints.insert(name.into(), value.into());
        self
    }

    /// Get a datapoint by name
    pub fn get(&self, name: &str) -> Option<&DatapointValue> {
        self.datapoints.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_builder() {
        let reading = Reading::new("temperature")
            .with_datapoint("celsius", 21.5)
            .with_datapoint("sensor", "t1")
            .with_datapoint("count", 3_i64);

        assert_eq!(reading.asset, "temperature");
        assert_eq!(reading.get("celsius").and_then(|v| v.as_f64()), Some(21.5));
        assert_eq!(reading.get("count").and_then(|v| v.as_f64()), Some(3.0));
        assert_eq!(reading.get("sensor").and_then(|v| v.as_f64()), None);
    }

    #[test]
    fn test_datapoints_serialize_untagged() {
        let reading = Reading::new("a").with_datapoint("x", 1_i64).with_datapoint("y", "on");
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["datapoints"], serde_json::json!({"x": 1, "y": "on"}));
    }
}

//! Storage entity representation
//!
//! A flat property bag addressed by partition key and row key, the shape
//! expected by key-value table stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed entity property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EntityProperty {
    String(String),
    Int64(i64),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl From<String> for EntityProperty {
    fn from(value: String) -> Self {
        EntityProperty::String(value)
    }
}

impl From<&str> for EntityProperty {
    fn from(value: &str) -> Self {
        EntityProperty::String(value.to_string())
    }
}

impl From<i64> for EntityProperty {
    fn from(value: i64) -> Self {
        EntityProperty::Int64(value)
    }
}

impl From<f64> for EntityProperty {
    fn from(value: f64) -> Self {
        EntityProperty::Double(value)
    }
}

impl From<bool> for EntityProperty {
    fn from(value: bool) -> Self {
        EntityProperty::Bool(value)
    }
}

impl From<DateTime<Utc>> for EntityProperty {
    fn from(value: DateTime<Utc>) -> Self {
        EntityProperty::DateTime(value)
    }
}

/// Stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    properties: BTreeMap<String, EntityProperty>,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<EntityProperty>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style insert that skips `None`
    pub fn with_opt<V: Into<EntityProperty>>(mut self, name: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.insert(name, value);
        }
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<EntityProperty>) {
        self.properties.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&EntityProperty> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, EntityProperty> {
        &self.properties
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(EntityProperty::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.properties.get(name) {
            Some(EntityProperty::Int64(value)) => Some(*value),
            _ => None,
        }
    }

    /// Integers are widened so stores that narrow numbers still decode
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.properties.get(name) {
            Some(EntityProperty::Double(value)) => Some(*value),
            Some(EntityProperty::Int64(value)) => Some(*value as f64),
            _ => None,
        }
    }

    /// Accepts native timestamps and RFC 3339 strings
    pub fn get_datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.properties.get(name) {
            Some(EntityProperty::DateTime(value)) => Some(*value),
            Some(EntityProperty::String(value)) => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }
}

//! Named action properties.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Read-only configuration view handed to processors.
///
/// Values are stored as JSON so one action can carry options of any shape
/// and typed config structs can be decoded from the whole set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    values: BTreeMap<String, Value>,
}

impl Properties {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property.
    ///
    /// # Errors
    /// Returns an error if the value cannot be represented as JSON.
    pub fn set<T: Serialize>(&mut self, name: &str, value: T) -> Result<()> {
        self.values
            .insert(name.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Sets a property, consuming and returning the set.
    ///
    /// # Errors
    /// Returns an error if the value cannot be represented as JSON.
    pub fn with<T: Serialize>(mut self, name: &str, value: T) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Decodes a property. Absence is `Ok(None)`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidProperty`] if the stored value has another type.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.values
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| Error::InvalidProperty {
                    name: name.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Returns true if the property is set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterates over property names.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.keys().map(String::as_str)
    }

    /// Decodes the whole set into a config struct.
    ///
    /// Fields missing from the set take the struct's serde defaults.
    ///
    /// # Errors
    /// Returns [`Error::InvalidProperty`] naming the offending struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let object: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(object)).map_err(|e| Error::InvalidProperty {
            name: std::any::type_name::<T>().to_string(),
            message: e.to_string(),
        })
    }
}

impl From<Map<String, Value>> for Properties {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

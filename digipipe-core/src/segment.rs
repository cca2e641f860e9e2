//! Data segments: the per-event stores of keyed containers.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::container::{AnyContainer, Container};
use crate::error::{Error, Result};
use crate::key::{Key, Mask};

/// Mapping from [`Key`] to a type-erased container for one event.
#[derive(Debug, Default)]
pub struct DataSegment {
    name: String,
    data: BTreeMap<Key, Box<dyn AnyContainer>>,
}

impl DataSegment {
    /// Creates an empty segment.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: BTreeMap::new(),
        }
    }

    /// Segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no container is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if a container is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: Key) -> bool {
        self.data.contains_key(&key)
    }

    /// Looks up a container.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<&dyn AnyContainer> {
        self.data.get(&key).map(|v| &**v)
    }

    /// Looks up a container of a known type.
    ///
    /// Absence is `Ok(None)`; a stored value of another type is an error.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] if the stored value is not a `T`.
    pub fn get_typed<T: Container>(&self, key: Key) -> Result<Option<&T>> {
        self.get(key).map(|v| v.checked_ref::<T>(key)).transpose()
    }

    /// Stores a new container.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateKey`] if `key` is already used.
    pub fn emplace(&mut self, key: Key, value: Box<dyn AnyContainer>) -> Result<()> {
        match self.data.entry(key) {
            Entry::Occupied(_) => Err(Error::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// Stores a new typed container.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateKey`] if `key` is already used.
    pub fn emplace_container<T: Container>(&mut self, key: Key, value: T) -> Result<()> {
        self.emplace(key, Box::new(value))
    }

    /// Appends to the container under `key`, inserting it if absent.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] if a container of another type is
    /// already stored under `key`.
    pub fn append(&mut self, key: Key, value: Box<dyn AnyContainer>) -> Result<()> {
        match self.data.entry(key) {
            Entry::Occupied(mut slot) => slot.get_mut().merge_boxed(key, value),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// Removes and returns a container.
    pub fn remove(&mut self, key: Key) -> Option<Box<dyn AnyContainer>> {
        self.data.remove(&key)
    }

    /// Iterates over all keys in order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.data.keys().copied()
    }

    /// Iterates over the keys stored under one mask.
    pub fn keys_with_mask(&self, mask: Mask) -> impl Iterator<Item = Key> + '_ {
        self.keys().filter(move |k| k.mask() == mask)
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &dyn AnyContainer)> + '_ {
        self.data.iter().map(|(k, v)| (*k, &**v))
    }

    /// Moves every container of `other` into this segment.
    ///
    /// Containers under keys already present are appended to. Types are
    /// checked for every key before anything is moved, so on error this
    /// segment is unchanged.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] on the first conflicting key.
    pub fn merge(&mut self, other: DataSegment) -> Result<()> {
        for (key, value) in &other.data {
            if let Some(existing) = self.data.get(key) {
                if existing.as_any().type_id() != value.as_any().type_id() {
                    return Err(Error::TypeMismatch {
                        key: *key,
                        expected: existing.type_name(),
                        actual: value.type_name(),
                    });
                }
            }
        }
        for (key, value) in other.data {
            self.append(key, value)?;
        }
        Ok(())
    }

    /// Removes every container.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

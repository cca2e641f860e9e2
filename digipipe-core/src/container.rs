//! Typed containers and their type-erased form.
//!
//! Data segments store containers as `Box<dyn AnyContainer>`. Any type
//! implementing [`Container`] gets the erased interface for free, so
//! processors can recover the concrete type with
//! [`downcast_ref`](trait.AnyContainer.html#method.downcast_ref) and the
//! output merge can append two containers of the same type without knowing
//! what they hold.

use serde::{Deserialize, Serialize};
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;

use crate::deposit::{CellId, EnergyDeposit};
use crate::error::{Error, Result};
use crate::key::Key;

/// A per-event collection that can be stored in a data segment.
pub trait Container: Any + Send + Sync + fmt::Debug {
    /// Number of elements.
    fn size(&self) -> usize;

    /// Appends the content of another container of the same type.
    fn merge(&mut self, other: Self)
    where
        Self: Sized;
}

/// Type-erased container as stored in a data segment.
pub trait AnyContainer: Send + Sync + fmt::Debug {
    /// Borrows the value as `Any`.
    fn as_any(&self) -> &dyn Any;

    /// Converts the boxed value into a boxed `Any`.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    /// Name of the concrete type.
    fn type_name(&self) -> &'static str;

    /// Number of elements.
    fn len(&self) -> usize;

    /// Returns true if the container holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `other`, which must have the same concrete type.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] if the types differ; `self` is left
    /// untouched in that case.
    fn merge_boxed(&mut self, key: Key, other: Box<dyn AnyContainer>) -> Result<()>;
}

impl<T: Container> AnyContainer for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn len(&self) -> usize {
        self.size()
    }

    fn merge_boxed(&mut self, key: Key, other: Box<dyn AnyContainer>) -> Result<()> {
        let actual = other.type_name();
        match other.into_any().downcast::<T>() {
            Ok(other) => {
                self.merge(*other);
                Ok(())
            }
            Err(_) => Err(Error::TypeMismatch {
                key,
                expected: type_name::<T>(),
                actual,
            }),
        }
    }
}

impl<'a> dyn AnyContainer + 'a {
    /// Returns true if the stored value is a `T`.
    #[must_use]
    pub fn is<T: Container>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrows the stored value as a `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Container>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Borrows the stored value as a `T`, reporting a mismatch as an error.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] if the stored value is not a `T`.
    pub fn checked_ref<T: Container>(&self, key: Key) -> Result<&T> {
        self.downcast_ref::<T>().ok_or_else(|| Error::TypeMismatch {
            key,
            expected: type_name::<T>(),
            actual: self.type_name(),
        })
    }

    /// Views the value as a deposit container, if it is one.
    #[must_use]
    pub fn deposits(&self) -> Option<DepositView<'_>> {
        if let Some(vector) = self.downcast_ref::<DepositVector>() {
            Some(DepositView::Vector(vector))
        } else {
            self.downcast_ref::<DepositMapping>()
                .map(DepositView::Mapping)
        }
    }
}

/// Ordered list of deposits, possibly with repeated cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositVector {
    /// Container name.
    pub name: String,
    /// Container key.
    pub key: Key,
    /// Deposits in insertion order.
    pub data: Vec<(CellId, EnergyDeposit)>,
}

impl DepositVector {
    /// Creates an empty container.
    #[must_use]
    pub fn new(name: &str, key: Key) -> Self {
        Self {
            name: name.to_string(),
            key,
            data: Vec::new(),
        }
    }

    /// Appends one deposit.
    pub fn emplace(&mut self, cell: CellId, deposit: EnergyDeposit) {
        self.data.push((cell, deposit));
    }

    /// Returns the number of deposits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sum of all deposited energy.
    #[must_use]
    pub fn total_energy(&self) -> f64 {
        self.data.iter().map(|(_, d)| d.energy).sum()
    }
}

impl Container for DepositVector {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn merge(&mut self, mut other: Self) {
        self.data.append(&mut other.data);
    }
}

/// Deposits keyed by cell; repeated cells are combined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositMapping {
    /// Container name.
    pub name: String,
    /// Container key.
    pub key: Key,
    /// Deposits by cell.
    pub data: BTreeMap<CellId, EnergyDeposit>,
}

impl DepositMapping {
    /// Creates an empty container.
    #[must_use]
    pub fn new(name: &str, key: Key) -> Self {
        Self {
            name: name.to_string(),
            key,
            data: BTreeMap::new(),
        }
    }

    /// Inserts a deposit, combining it with an existing one for the same cell.
    pub fn emplace(&mut self, cell: CellId, deposit: EnergyDeposit) {
        self.data
            .entry(cell)
            .and_modify(|existing| existing.update(&deposit))
            .or_insert(deposit);
    }

    /// Returns the number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sum of all deposited energy.
    #[must_use]
    pub fn total_energy(&self) -> f64 {
        self.data.values().map(|d| d.energy).sum()
    }
}

impl Container for DepositMapping {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn merge(&mut self, other: Self) {
        for (cell, deposit) in other.data {
            self.emplace(cell, deposit);
        }
    }
}

/// Read-only view over either deposit container type.
#[derive(Debug, Clone, Copy)]
pub enum DepositView<'a> {
    /// A [`DepositVector`].
    Vector(&'a DepositVector),
    /// A [`DepositMapping`].
    Mapping(&'a DepositMapping),
}

impl<'a> DepositView<'a> {
    /// Container name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        match *self {
            DepositView::Vector(v) => &v.name,
            DepositView::Mapping(m) => &m.name,
        }
    }

    /// Number of deposits.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            DepositView::Vector(v) => v.len(),
            DepositView::Mapping(m) => m.len(),
        }
    }

    /// Returns true if there are no deposits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over `(cell, deposit)` pairs.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (CellId, &'a EnergyDeposit)> + 'a> {
        match *self {
            DepositView::Vector(v) => Box::new(v.data.iter().map(|(c, d)| (*c, d))),
            DepositView::Mapping(m) => Box::new(m.data.iter().map(|(c, d)| (*c, d))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mapping_combines_cells() {
        let key = Key::new(0, "ecal");
        let mut mapping = DepositMapping::new("ecal", key);
        mapping.emplace(7, EnergyDeposit::new(1.0, 2.0));
        mapping.emplace(7, EnergyDeposit::new(0.5, 1.0));
        mapping.emplace(8, EnergyDeposit::new(2.0, 3.0));
        assert_eq!(mapping.len(), 2);
        assert_relative_eq!(mapping.total_energy(), 3.5);
        assert_relative_eq!(mapping.data[&7].time, 1.0);
    }

    #[test]
    fn test_merge_boxed_same_type() {
        let key = Key::new(0, "trk");
        let mut a: Box<dyn AnyContainer> = Box::new(DepositVector::new("trk", key));
        let mut b = DepositVector::new("trk", key);
        b.emplace(1, EnergyDeposit::new(1.0, 0.0));
        b.emplace(1, EnergyDeposit::new(1.0, 0.0));
        a.merge_boxed(key, Box::new(b)).unwrap();
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_merge_boxed_type_mismatch() {
        let key = Key::new(0, "trk");
        let mut a: Box<dyn AnyContainer> = Box::new(DepositVector::new("trk", key));
        let err = a
            .merge_boxed(key, Box::new(DepositMapping::new("trk", key)))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(a.is_empty());
    }

    #[test]
    fn test_downcast_and_view() {
        let key = Key::new(0, "hcal");
        let mut mapping = DepositMapping::new("hcal", key);
        mapping.emplace(3, EnergyDeposit::new(4.0, 0.0));
        let erased: Box<dyn AnyContainer> = Box::new(mapping);

        assert!(erased.is::<DepositMapping>());
        assert!(erased.downcast_ref::<DepositVector>().is_none());
        assert!(erased.checked_ref::<DepositVector>(key).is_err());

        let view = erased.deposits().unwrap();
        assert_eq!(view.name(), "hcal");
        let cells: Vec<CellId> = view.iter().map(|(c, _)| c).collect();
        assert_eq!(cells, vec![3]);
    }
}

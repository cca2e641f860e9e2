//! Container processor contract and work definitions.

use digipipe_core::container::{AnyContainer, Container};
use digipipe_core::context::EventContext;
use digipipe_core::error::{Error, Result};
use digipipe_core::key::{Key, Mask};
use digipipe_core::properties::Properties;
use digipipe_core::segment::DataSegment;
use std::sync::Mutex;

use crate::predicate::Predicate;

/// One input container slot.
///
/// `data` is `None` when the container is absent for this event.
#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
    /// Input data key.
    pub key: Key,
    /// Input container.
    pub data: Option<&'a dyn AnyContainer>,
}

impl<'a> Input<'a> {
    /// Creates an input slot.
    #[must_use]
    pub fn new(key: Key, data: Option<&'a dyn AnyContainer>) -> Self {
        Self { key, data }
    }

    /// Typed access to the container.
    ///
    /// Absence is `Ok(None)`. A container of another type is an error when
    /// `checked` is set and `Ok(None)` otherwise.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] on a checked access to another type.
    pub fn get<T: Container>(&self, checked: bool) -> Result<Option<&'a T>> {
        match self.data {
            None => Ok(None),
            Some(data) if checked => data.checked_ref::<T>(self.key).map(Some),
            Some(data) => Ok(data.downcast_ref::<T>()),
        }
    }
}

/// Handle through which processors append results.
///
/// The segment behind it is shared by every worker of one dispatch; each
/// append takes the lock only for the duration of the merge.
#[derive(Debug)]
pub struct Output<'a> {
    /// Event mask of the output stream.
    pub mask: Mask,
    segment: &'a Mutex<DataSegment>,
    owner: &'a str,
}

impl<'a> Output<'a> {
    /// Creates an output handle over a locked segment.
    #[must_use]
    pub fn new(mask: Mask, segment: &'a Mutex<DataSegment>, owner: &'a str) -> Self {
        Self {
            mask,
            segment,
            owner,
        }
    }

    /// Key of the named output container in this stream.
    #[must_use]
    pub fn key(&self, name: &str) -> Key {
        Key::new(self.mask, name)
    }

    /// Appends a container, merging it into an existing one under `key`.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned or a container of another
    /// type is stored under `key`.
    pub fn append<T: Container>(&self, key: Key, value: T) -> Result<()> {
        self.with_segment(|segment| segment.append(key, Box::new(value)))?
    }

    /// Runs `f` with exclusive access to the output segment.
    ///
    /// # Errors
    /// Returns [`Error::LockPoisoned`] if another worker panicked while
    /// holding the lock.
    pub fn with_segment<R>(&self, f: impl FnOnce(&mut DataSegment) -> R) -> Result<R> {
        let mut guard = self
            .segment
            .lock()
            .map_err(|_| Error::LockPoisoned(self.owner.to_string()))?;
        Ok(f(&mut guard))
    }
}

/// Work for a single-container call.
#[derive(Debug, Clone, Copy)]
pub struct Work<'a> {
    /// Event processing context.
    pub context: &'a EventContext,
    /// Input data.
    pub input: Input<'a>,
    /// Output data.
    pub output: &'a Output<'a>,
    /// Properties of the dispatching action.
    pub properties: &'a Properties,
}

impl<'a> Work<'a> {
    /// Basic check if input data are present.
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.input.data.is_some()
    }

    /// Key of the input container.
    #[must_use]
    pub fn input_key(&self) -> Key {
        self.input.key
    }

    /// Type name of the input container, if present.
    #[must_use]
    pub fn input_type_name(&self) -> Option<&'static str> {
        self.input.data.map(|data| data.type_name())
    }

    /// Typed access to the input container. See [`Input::get`].
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] on a checked access to another type.
    pub fn get_input<T: Container>(&self, checked: bool) -> Result<Option<&'a T>> {
        self.input.get(checked)
    }
}

/// Work for a joint call over several containers.
#[derive(Debug, Clone)]
pub struct MultiWork<'a> {
    /// Event processing context.
    pub context: &'a EventContext,
    /// One slot per declared key, in declaration order.
    pub items: Vec<Input<'a>>,
    /// Output data.
    pub output: &'a Output<'a>,
    /// Properties of the dispatching action.
    pub properties: &'a Properties,
    /// Input masks of the dispatching action.
    pub input_masks: &'a [Mask],
}

impl<'a> MultiWork<'a> {
    /// Slot for `key`, if the processor declared it.
    #[must_use]
    pub fn item(&self, key: Key) -> Option<&Input<'a>> {
        self.items.iter().find(|i| i.key == key)
    }

    /// Slots whose containers are present.
    pub fn present(&self) -> impl Iterator<Item = &Input<'a>> + '_ {
        self.items.iter().filter(|i| i.data.is_some())
    }

    /// Single-container work for one slot.
    #[must_use]
    pub fn single(&self, input: Input<'a>) -> Work<'a> {
        Work {
            context: self.context,
            input,
            output: self.output,
            properties: self.properties,
        }
    }
}

/// The atomic unit of work: turns input containers into output contributions.
///
/// Implementations must tolerate absent inputs (treat them as nothing to
/// do), honor the predicate for every deposit they consume, and write only
/// through `work.output`.
pub trait ContainerProcessor: Send + Sync {
    /// Name of the processor.
    fn name(&self) -> &str;

    /// Processes one input container.
    ///
    /// # Errors
    /// Returns an error if the input cannot be handled or the output merge
    /// fails. Absent input is not an error.
    fn execute(&self, work: &Work<'_>, predicate: &Predicate) -> Result<()>;

    /// Processes several containers jointly.
    ///
    /// The default calls [`execute`](Self::execute) once per present slot.
    ///
    /// # Errors
    /// Returns the first error raised by a slot.
    fn execute_joint(&self, work: &MultiWork<'_>, predicate: &Predicate) -> Result<()> {
        for input in work.present() {
            self.execute(&work.single(*input), predicate)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digipipe_core::container::{DepositMapping, DepositVector};

    #[test]
    fn test_checked_and_unchecked_access() {
        let key = Key::new(0, "ecal");
        let vector = DepositVector::new("ecal", key);
        let input = Input::new(key, Some(&vector));

        assert!(input.get::<DepositVector>(true).unwrap().is_some());
        assert!(input.get::<DepositMapping>(false).unwrap().is_none());
        assert!(matches!(
            input.get::<DepositMapping>(true),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_absent_input() {
        let context = EventContext::new(0);
        let segment = Mutex::new(DataSegment::new("outputs"));
        let output = Output::new(0, &segment, "test");
        let properties = Properties::new();
        let work = Work {
            context: &context,
            input: Input::new(Key::new(0, "ecal"), None),
            output: &output,
            properties: &properties,
        };
        assert!(!work.has_input());
        assert!(work.input_type_name().is_none());
        assert!(work.get_input::<DepositVector>(true).unwrap().is_none());
    }

    #[test]
    fn test_output_append_merges() {
        let segment = Mutex::new(DataSegment::new("outputs"));
        let output = Output::new(2, &segment, "test");
        let key = output.key("hits");
        assert_eq!(key.mask(), 2);

        let mut first = DepositMapping::new("hits", key);
        first.emplace(1, digipipe_core::EnergyDeposit::new(1.0, 0.0));
        let mut second = DepositMapping::new("hits", key);
        second.emplace(2, digipipe_core::EnergyDeposit::new(1.0, 0.0));
        output.append(key, first).unwrap();
        output.append(key, second).unwrap();

        let merged = segment.into_inner().unwrap();
        assert_eq!(merged.get(key).unwrap().len(), 2);
    }
}

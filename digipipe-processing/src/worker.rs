//! Pairing of a processor with the containers it handles.

use digipipe_core::key::Key;
use std::fmt;
use std::sync::Arc;

use crate::processor::ContainerProcessor;

/// A processor together with the keys it was registered for.
#[derive(Clone)]
pub struct Worker {
    processor: Arc<dyn ContainerProcessor>,
    keys: Vec<Key>,
}

impl Worker {
    /// Creates a worker with no keys.
    #[must_use]
    pub fn new(processor: Arc<dyn ContainerProcessor>) -> Self {
        Self {
            processor,
            keys: Vec::new(),
        }
    }

    /// The wrapped processor.
    #[must_use]
    pub fn processor(&self) -> &dyn ContainerProcessor {
        self.processor.as_ref()
    }

    /// Name of the wrapped processor.
    #[must_use]
    pub fn name(&self) -> &str {
        self.processor.name()
    }

    /// Keys in registration order.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Adds a key; returns false if it was already present.
    pub(crate) fn add_key(&mut self, key: Key) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// True if this worker wraps exactly `processor`.
    #[must_use]
    pub fn wraps(&self, processor: &Arc<dyn ContainerProcessor>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.processor), Arc::as_ptr(processor))
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("processor", &self.name())
            .field("keys", &self.keys)
            .finish()
    }
}

/// Finds the worker for `processor` in `workers`, or appends a new one.
///
/// Two distinct processors sharing a name are rejected so that log and
/// error messages stay unambiguous.
pub(crate) fn find_or_add_worker(
    workers: &mut Vec<Worker>,
    processor: &Arc<dyn ContainerProcessor>,
) -> Result<usize, String> {
    if let Some(index) = workers.iter().position(|w| w.wraps(processor)) {
        return Ok(index);
    }
    if workers.iter().any(|w| w.name() == processor.name()) {
        return Err(format!(
            "another processor named '{}' is already adopted",
            processor.name()
        ));
    }
    workers.push(Worker::new(Arc::clone(processor)));
    Ok(workers.len() - 1)
}

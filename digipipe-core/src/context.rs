//! Per-event processing context.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::segment::DataSegment;

/// Everything known about the event currently being processed.
///
/// Holds the named data segments. Actions read their input segment through
/// `&self` while workers run, and write to their output segment through
/// `&mut self` once the dispatch has completed.
#[derive(Debug, Default)]
pub struct EventContext {
    event_number: u64,
    segments: BTreeMap<String, DataSegment>,
}

impl EventContext {
    /// Creates a context with no segments.
    #[must_use]
    pub fn new(event_number: u64) -> Self {
        Self {
            event_number,
            segments: BTreeMap::new(),
        }
    }

    /// Event number.
    #[must_use]
    pub fn event_number(&self) -> u64 {
        self.event_number
    }

    /// Looks up a segment by name.
    ///
    /// # Errors
    /// Returns [`Error::MissingSegment`] if the segment does not exist.
    pub fn segment(&self, name: &str) -> Result<&DataSegment> {
        self.segments
            .get(name)
            .ok_or_else(|| Error::MissingSegment(name.to_string()))
    }

    /// Looks up a segment by name for writing.
    ///
    /// # Errors
    /// Returns [`Error::MissingSegment`] if the segment does not exist.
    pub fn segment_mut(&mut self, name: &str) -> Result<&mut DataSegment> {
        self.segments
            .get_mut(name)
            .ok_or_else(|| Error::MissingSegment(name.to_string()))
    }

    /// Returns the named segment, creating an empty one if needed.
    pub fn ensure_segment(&mut self, name: &str) -> &mut DataSegment {
        self.segments
            .entry(name.to_string())
            .or_insert_with(|| DataSegment::new(name))
    }

    /// Iterates over all segments in name order.
    pub fn segments(&self) -> impl Iterator<Item = &DataSegment> + '_ {
        self.segments.values()
    }

    /// Removes and returns a segment.
    pub fn take_segment(&mut self, name: &str) -> Option<DataSegment> {
        self.segments.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_segment() {
        let context = EventContext::new(4);
        assert_eq!(context.event_number(), 4);
        assert!(matches!(
            context.segment("inputs"),
            Err(Error::MissingSegment(name)) if name == "inputs"
        ));
    }

    #[test]
    fn test_ensure_segment() {
        let mut context = EventContext::new(0);
        context.ensure_segment("outputs");
        assert_eq!(context.segment("outputs").unwrap().name(), "outputs");
        assert!(context.segment_mut("outputs").unwrap().is_empty());
        assert_eq!(context.segments().count(), 1);
    }
}

//! Deposit filters attached to processing calls.

use digipipe_core::deposit::{CellId, EnergyDeposit};
use digipipe_core::segmentation::SegmentContext;
use std::fmt;
use std::sync::Arc;

/// Signature of a user-supplied deposit filter.
pub type FilterFn = dyn Fn(CellId, &EnergyDeposit, Option<&SegmentContext>) -> bool + Send + Sync;

#[derive(Clone)]
enum Filter {
    AcceptAll,
    SplitId,
    Callback(Arc<FilterFn>),
}

/// Decides per deposit whether it should be processed.
///
/// Predicates are pure: they may consult the attached segment context but
/// never mutate shared state. Cloning is cheap; the callback is shared.
#[derive(Clone)]
pub struct Predicate {
    filter: Filter,
    id: u32,
    segmentation: Option<Arc<SegmentContext>>,
}

static ACCEPT_ALL: Predicate = Predicate {
    filter: Filter::AcceptAll,
    id: 0,
    segmentation: None,
};

/// The process-wide predicate accepting every deposit.
#[must_use]
pub fn accept_all() -> &'static Predicate {
    &ACCEPT_ALL
}

impl Predicate {
    /// Wraps a filter closure.
    ///
    /// `id` identifies whoever installed the predicate.
    pub fn new<F>(id: u32, callback: F) -> Self
    where
        F: Fn(CellId, &EnergyDeposit, Option<&SegmentContext>) -> bool + Send + Sync + 'static,
    {
        Self {
            filter: Filter::Callback(Arc::new(callback)),
            id,
            segmentation: None,
        }
    }

    /// Wraps a filter closure that ignores the segment context.
    pub fn from_fn<F>(id: u32, callback: F) -> Self
    where
        F: Fn(CellId, &EnergyDeposit) -> bool + Send + Sync + 'static,
    {
        Self::new(id, move |cell, deposit, _| callback(cell, deposit))
    }

    /// Accepts only deposits whose cells fall in split `split_id` of the
    /// segment context.
    #[must_use]
    pub fn split(segmentation: Arc<SegmentContext>, split_id: u32) -> Self {
        Self {
            filter: Filter::SplitId,
            id: split_id,
            segmentation: Some(segmentation),
        }
    }

    /// Accepts deposits with at least `threshold` energy.
    #[must_use]
    pub fn min_energy(id: u32, threshold: f64) -> Self {
        Self::from_fn(id, move |_, deposit| deposit.energy >= threshold)
    }

    /// Attaches a segment context for the callback to consult.
    #[must_use]
    pub fn with_segmentation(mut self, segmentation: Arc<SegmentContext>) -> Self {
        self.segmentation = Some(segmentation);
        self
    }

    /// Identifier of the installer.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Attached segment context, if any.
    #[must_use]
    pub fn segmentation(&self) -> Option<&SegmentContext> {
        self.segmentation.as_deref()
    }

    /// Returns true if the predicate accepts every deposit unconditionally.
    #[must_use]
    pub fn is_accept_all(&self) -> bool {
        matches!(self.filter, Filter::AcceptAll)
    }

    /// Checks if a deposit should be processed.
    #[inline]
    #[must_use]
    pub fn accepts(&self, cell: CellId, deposit: &EnergyDeposit) -> bool {
        match &self.filter {
            Filter::AcceptAll => true,
            Filter::SplitId => self
                .segmentation
                .as_ref()
                .is_some_and(|s| s.split_id(cell) == self.id),
            Filter::Callback(callback) => callback(cell, deposit, self.segmentation()),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        ACCEPT_ALL.clone()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.filter {
            Filter::AcceptAll => "accept_all",
            Filter::SplitId => "split_id",
            Filter::Callback(_) => "callback",
        };
        f.debug_struct("Predicate")
            .field("filter", &kind)
            .field("id", &self.id)
            .field(
                "segmentation",
                &self.segmentation.as_ref().map(|s| s.detector.as_str()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digipipe_core::segmentation::BitFieldCoder;

    #[test]
    fn test_accept_all() {
        let deposit = EnergyDeposit::new(0.0, 0.0);
        assert!(accept_all().accepts(42, &deposit));
        assert!(accept_all().is_accept_all());
        assert_eq!(accept_all().id(), 0);
        assert!(Predicate::default().is_accept_all());
    }

    #[test]
    fn test_min_energy() {
        let predicate = Predicate::min_energy(3, 0.5);
        assert!(predicate.accepts(1, &EnergyDeposit::new(0.5, 0.0)));
        assert!(!predicate.accepts(1, &EnergyDeposit::new(0.49, 0.0)));
        assert_eq!(predicate.id(), 3);
    }

    #[test]
    fn test_split_predicate() {
        let coder = BitFieldCoder::new("system:8,layer:8,x:32:-16,y:-16").unwrap();
        let context = Arc::new(SegmentContext::new("ecal", &coder, "layer").unwrap());
        let predicate = Predicate::split(context, 2);

        let mut cell = 0;
        coder.set(&mut cell, "layer", 2).unwrap();
        let deposit = EnergyDeposit::new(1.0, 0.0);
        assert!(predicate.accepts(cell, &deposit));
        coder.set(&mut cell, "layer", 3).unwrap();
        assert!(!predicate.accepts(cell, &deposit));
    }

    #[test]
    fn test_callback_sees_segmentation() {
        let coder = BitFieldCoder::new("system:8,layer:8").unwrap();
        let context = Arc::new(SegmentContext::new("hcal", &coder, "system").unwrap());
        let predicate = Predicate::new(9, |cell, _, seg| {
            seg.is_some_and(|s| s.detector == "hcal" && s.split_id(cell) == 1)
        })
        .with_segmentation(context);
        assert!(predicate.accepts(1, &EnergyDeposit::default()));
        assert!(!predicate.accepts(2, &EnergyDeposit::default()));
    }
}

//! Leaf processors operating on deposit containers.

use digipipe_core::container::{DepositMapping, DepositVector};
use digipipe_core::error::{Error, Result};
use log::trace;

use crate::predicate::Predicate;
use crate::processor::{ContainerProcessor, Input, MultiWork, Output, Work};

/// Copies the accepted deposits of one input into a mapping.
///
/// Returns the number of accepted deposits, zero for an absent input. Any
/// container other than a deposit container is a type mismatch.
fn collect_accepted(
    input: &Input<'_>,
    predicate: &Predicate,
    target: &mut Option<DepositMapping>,
    name: Option<&str>,
    output: &Output<'_>,
) -> Result<usize> {
    let Some(data) = input.data else {
        return Ok(0);
    };
    let view = data.deposits().ok_or_else(|| Error::TypeMismatch {
        key: input.key,
        expected: std::any::type_name::<DepositVector>(),
        actual: data.type_name(),
    })?;
    let mapping = target.get_or_insert_with(|| {
        let name = name.unwrap_or_else(|| view.name());
        DepositMapping::new(name, output.key(name))
    });
    let mut accepted = 0;
    for (cell, deposit) in view.iter() {
        if predicate.accepts(cell, deposit) {
            mapping.emplace(cell, deposit.with_mask(input.key.mask()));
            accepted += 1;
        }
    }
    Ok(accepted)
}

/// Copies predicate-accepted deposits into a [`DepositMapping`] of the
/// output stream.
///
/// The output container keeps the input container's name unless an explicit
/// output name is set. Each deposit is tagged with the mask of the stream it
/// came from.
#[derive(Debug, Clone)]
pub struct DepositCollector {
    name: String,
    output_name: Option<String>,
}

impl DepositCollector {
    /// Creates a collector keeping input container names.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            output_name: None,
        }
    }

    /// Writes every collected deposit to the container `name` instead.
    #[must_use]
    pub fn with_output_name(mut self, name: &str) -> Self {
        self.output_name = Some(name.to_string());
        self
    }
}

impl ContainerProcessor for DepositCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, work: &Work<'_>, predicate: &Predicate) -> Result<()> {
        let mut collected = None;
        let accepted = collect_accepted(
            &work.input,
            predicate,
            &mut collected,
            self.output_name.as_deref(),
            work.output,
        )?;
        trace!("{}: {} accepted from {}", self.name, accepted, work.input_key());
        match collected {
            Some(mapping) if !mapping.is_empty() => work.output.append(mapping.key, mapping),
            _ => Ok(()),
        }
    }
}

/// Merges all present inputs of a joint call into one named container.
#[derive(Debug, Clone)]
pub struct ContainerCombine {
    name: String,
    output_name: String,
}

impl ContainerCombine {
    /// Creates a combiner writing to `output_name`.
    #[must_use]
    pub fn new(name: &str, output_name: &str) -> Self {
        Self {
            name: name.to_string(),
            output_name: output_name.to_string(),
        }
    }

    /// Name of the combined container.
    #[must_use]
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    fn combine<'a>(
        &self,
        inputs: impl Iterator<Item = &'a Input<'a>>,
        output: &Output<'_>,
        predicate: &Predicate,
    ) -> Result<()> {
        let mut combined = None;
        let mut sources = 0;
        for input in inputs {
            collect_accepted(
                input,
                predicate,
                &mut combined,
                Some(self.output_name.as_str()),
                output,
            )?;
            sources += 1;
        }
        trace!("{}: combined {} containers", self.name, sources);
        match combined {
            Some(mapping) if !mapping.is_empty() => output.append(mapping.key, mapping),
            _ => Ok(()),
        }
    }
}

impl ContainerProcessor for ContainerCombine {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, work: &Work<'_>, predicate: &Predicate) -> Result<()> {
        self.combine(std::iter::once(&work.input), work.output, predicate)
    }

    fn execute_joint(&self, work: &MultiWork<'_>, predicate: &Predicate) -> Result<()> {
        self.combine(work.present(), work.output, predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use digipipe_core::container::AnyContainer;
    use digipipe_core::context::EventContext;
    use digipipe_core::deposit::EnergyDeposit;
    use digipipe_core::key::Key;
    use digipipe_core::properties::Properties;
    use digipipe_core::segment::DataSegment;
    use std::sync::Mutex;

    fn vector(mask: u16, name: &str, deposits: &[(u64, f64)]) -> DepositVector {
        let mut vector = DepositVector::new(name, Key::new(mask, name));
        for &(cell, energy) in deposits {
            vector.emplace(cell, EnergyDeposit::new(energy, 1.0));
        }
        vector
    }

    #[test]
    fn test_collector_filters_and_tags_mask() {
        let input = vector(3, "ecal", &[(1, 0.5), (2, 2.0), (1, 1.5)]);
        let context = EventContext::new(0);
        let segment = Mutex::new(DataSegment::new("outputs"));
        let output = Output::new(9, &segment, "test");
        let properties = Properties::new();
        let work = Work {
            context: &context,
            input: Input::new(input.key, Some(&input)),
            output: &output,
            properties: &properties,
        };

        let collector = DepositCollector::new("collect");
        collector
            .execute(&work, &Predicate::min_energy(1, 1.0))
            .unwrap();

        let segment = segment.into_inner().unwrap();
        let mapping = segment
            .get_typed::<DepositMapping>(Key::new(9, "ecal"))
            .unwrap()
            .unwrap();
        assert_eq!(mapping.len(), 2);
        assert_relative_eq!(mapping.total_energy(), 3.5);
        assert!(mapping.data.values().all(|d| d.mask == 3));
    }

    #[test]
    fn test_collector_rejects_foreign_type() {
        #[derive(Debug)]
        struct Counts(usize);

        impl digipipe_core::container::Container for Counts {
            fn size(&self) -> usize {
                self.0
            }

            fn merge(&mut self, other: Self) {
                self.0 += other.0;
            }
        }

        let counts = Counts(4);
        let data: &dyn AnyContainer = &counts;
        let context = EventContext::new(0);
        let segment = Mutex::new(DataSegment::new("outputs"));
        let output = Output::new(0, &segment, "test");
        let properties = Properties::new();
        let work = Work {
            context: &context,
            input: Input::new(Key::new(0, "counts"), Some(data)),
            output: &output,
            properties: &properties,
        };
        let result = DepositCollector::new("collect").execute(&work, crate::predicate::accept_all());
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_combine_merges_present_inputs() {
        let ecal = vector(0, "ecal", &[(1, 1.0)]);
        let hcal = vector(0, "hcal", &[(1, 2.0), (5, 4.0)]);
        let context = EventContext::new(0);
        let segment = Mutex::new(DataSegment::new("outputs"));
        let output = Output::new(1, &segment, "test");
        let properties = Properties::new();
        let masks = [0];
        let work = MultiWork {
            context: &context,
            items: vec![
                Input::new(ecal.key, Some(&ecal)),
                Input::new(hcal.key, Some(&hcal)),
                Input::new(Key::new(0, "trk"), None),
            ],
            output: &output,
            properties: &properties,
            input_masks: &masks,
        };

        let combine = ContainerCombine::new("combine", "calo");
        combine
            .execute_joint(&work, crate::predicate::accept_all())
            .unwrap();

        let segment = segment.into_inner().unwrap();
        assert_eq!(segment.len(), 1);
        let calo = segment
            .get_typed::<DepositMapping>(Key::new(1, "calo"))
            .unwrap()
            .unwrap();
        assert_eq!(calo.len(), 2);
        assert_relative_eq!(calo.data[&1].energy, 3.0);
    }
}

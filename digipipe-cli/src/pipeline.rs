//! JSON pipeline and event files.

use digipipe_core::{
    AnyContainer, DataSegment, DepositMapping, DepositVector, EnergyDeposit, EventContext, Key,
    Mask, Properties,
};
use digipipe_processing::{
    ContainerCombine, ContainerProcessor, ContainerSequence, ContainerSequenceAction,
    DepositCollector, EventAction, EventLoop, MultiContainerProcessor, Predicate, WorkerPool,
};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::{CliError, Result};

/// Top-level pipeline description.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    /// Worker threads; 0 runs everything on the calling thread.
    #[serde(default)]
    pub num_threads: usize,
    /// Event actions in execution order.
    pub actions: Vec<ActionSpec>,
}

/// One event action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ActionSpec {
    /// A [`ContainerSequenceAction`].
    Sequence {
        name: String,
        #[serde(default)]
        properties: Map<String, Value>,
        #[serde(default)]
        min_energy: Option<f64>,
        processors: Vec<Binding>,
    },
    /// A [`MultiContainerProcessor`].
    Multi {
        name: String,
        #[serde(default)]
        properties: Map<String, Value>,
        #[serde(default)]
        min_energy: Option<f64>,
        processors: Vec<Binding>,
    },
}

/// A processor bound to container names.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Binding {
    pub containers: Vec<String>,
    pub processor: ProcessorSpec,
}

/// Processor construction parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProcessorSpec {
    Collect {
        name: String,
        #[serde(default)]
        output_container: Option<String>,
    },
    Combine {
        name: String,
        output_container: String,
    },
    Sequence {
        name: String,
        #[serde(default)]
        parallel: bool,
        processors: Vec<ProcessorSpec>,
    },
}

impl ProcessorSpec {
    fn name(&self) -> &str {
        match self {
            Self::Collect { name, .. } | Self::Combine { name, .. } | Self::Sequence { name, .. } => {
                name
            }
        }
    }

    fn build(&self, pool: &Arc<WorkerPool>) -> Arc<dyn ContainerProcessor> {
        match self {
            Self::Collect {
                name,
                output_container,
            } => {
                let collector = DepositCollector::new(name);
                match output_container {
                    Some(output) => Arc::new(collector.with_output_name(output)),
                    None => Arc::new(collector),
                }
            }
            Self::Combine {
                name,
                output_container,
            } => Arc::new(ContainerCombine::new(name, output_container)),
            Self::Sequence {
                name,
                parallel,
                processors,
            } => {
                let mut sequence =
                    ContainerSequence::new(name, Arc::clone(pool)).with_parallel(*parallel);
                for spec in processors {
                    sequence.adopt_processor(spec.build(pool));
                }
                Arc::new(sequence)
            }
        }
    }
}

/// Builds each named processor once so repeated bindings share it.
#[derive(Default)]
struct ProcessorCache {
    built: BTreeMap<String, (ProcessorSpec, Arc<dyn ContainerProcessor>)>,
}

impl ProcessorCache {
    fn get(
        &mut self,
        spec: &ProcessorSpec,
        pool: &Arc<WorkerPool>,
    ) -> Result<Arc<dyn ContainerProcessor>> {
        if let Some((existing, processor)) = self.built.get(spec.name()) {
            if existing != spec {
                return Err(CliError::Pipeline(format!(
                    "processor '{}' is defined twice with different parameters",
                    spec.name()
                )));
            }
            return Ok(Arc::clone(processor));
        }
        let processor = spec.build(pool);
        self.built.insert(
            spec.name().to_string(),
            (spec.clone(), Arc::clone(&processor)),
        );
        Ok(processor)
    }
}

fn predicate(min_energy: Option<f64>) -> Option<Predicate> {
    min_energy.map(|threshold| Predicate::min_energy(0, threshold))
}

impl PipelineFile {
    /// Reads a pipeline description.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Builds an initialized event loop and the output segment names.
    pub fn build(&self) -> Result<(EventLoop, BTreeSet<String>)> {
        let pool = Arc::new(WorkerPool::with_threads(self.num_threads)?);
        let mut event_loop = EventLoop::new(Arc::clone(&pool));
        let mut outputs = BTreeSet::new();

        for spec in &self.actions {
            let mut cache = ProcessorCache::default();
            let action: Box<dyn EventAction> = match spec {
                ActionSpec::Sequence {
                    name,
                    properties,
                    min_energy,
                    processors,
                } => {
                    let properties = Properties::from(properties.clone());
                    let mut action = ContainerSequenceAction::from_properties(
                        name,
                        properties,
                        Arc::clone(&pool),
                    )?;
                    if let Some(predicate) = predicate(*min_energy) {
                        action = action.with_predicate(predicate);
                    }
                    for binding in processors {
                        let processor = cache.get(&binding.processor, &pool)?;
                        action.adopt_processor(processor, &binding.containers)?;
                    }
                    outputs.insert(action.config().output_segment.clone());
                    Box::new(action)
                }
                ActionSpec::Multi {
                    name,
                    properties,
                    min_energy,
                    processors,
                } => {
                    let properties = Properties::from(properties.clone());
                    let mut action = MultiContainerProcessor::from_properties(
                        name,
                        properties,
                        Arc::clone(&pool),
                    )?;
                    if let Some(predicate) = predicate(*min_energy) {
                        action = action.with_predicate(predicate);
                    }
                    for binding in processors {
                        let processor = cache.get(&binding.processor, &pool)?;
                        action.adopt_processor(processor, &binding.containers)?;
                    }
                    outputs.insert(action.config().output_segment.clone());
                    Box::new(action)
                }
            };
            event_loop.add_action(action)?;
        }
        event_loop.initialize()?;
        Ok((event_loop, outputs))
    }
}

/// Layout of a deposit container in event files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    #[default]
    Vector,
    Mapping,
}

/// A deposit with its cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub cell: u64,
    #[serde(flatten)]
    pub deposit: EnergyDeposit,
}

/// One container of an event file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    #[serde(default)]
    pub mask: Mask,
    #[serde(default)]
    pub kind: ContainerKind,
    #[serde(default)]
    pub deposits: Vec<DepositRecord>,
}

/// One data segment of an event file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub name: String,
    #[serde(default)]
    pub containers: Vec<ContainerRecord>,
}

/// One event of an event file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_number: u64,
    #[serde(default)]
    pub segments: Vec<SegmentRecord>,
}

impl ContainerRecord {
    fn insert_into(&self, segment: &mut DataSegment) -> digipipe_core::Result<()> {
        let key = Key::new(self.mask, &self.name);
        let entries = self.deposits.iter().map(|r| (r.cell, r.deposit));
        match self.kind {
            ContainerKind::Vector => {
                let mut vector = DepositVector::new(&self.name, key);
                entries.for_each(|(cell, deposit)| vector.emplace(cell, deposit));
                segment.emplace_container(key, vector)
            }
            ContainerKind::Mapping => {
                let mut mapping = DepositMapping::new(&self.name, key);
                entries.for_each(|(cell, deposit)| mapping.emplace(cell, deposit));
                segment.emplace_container(key, mapping)
            }
        }
    }

    fn from_container(key: Key, data: &dyn AnyContainer) -> Option<Self> {
        let kind = if data.is::<DepositMapping>() {
            ContainerKind::Mapping
        } else {
            ContainerKind::Vector
        };
        let view = data.deposits()?;
        Some(Self {
            name: view.name().to_string(),
            mask: key.mask(),
            kind,
            deposits: view
                .iter()
                .map(|(cell, deposit)| DepositRecord {
                    cell,
                    deposit: *deposit,
                })
                .collect(),
        })
    }
}

impl EventRecord {
    /// Builds the event context.
    pub fn into_context(self) -> Result<EventContext> {
        let mut context = EventContext::new(self.event_number);
        for segment in self.segments {
            let target = context.ensure_segment(&segment.name);
            for container in &segment.containers {
                container.insert_into(target)?;
            }
        }
        Ok(context)
    }

    /// Captures the named segments of a processed event.
    pub fn from_context(context: &EventContext, segments: &BTreeSet<String>) -> Self {
        let segments = context
            .segments()
            .filter(|s| segments.contains(s.name()))
            .map(|segment| SegmentRecord {
                name: segment.name().to_string(),
                containers: segment
                    .iter()
                    .filter_map(|(key, data)| {
                        let record = ContainerRecord::from_container(key, data);
                        if record.is_none() {
                            warn!(
                                "{}: skipping {key} of type {}",
                                segment.name(),
                                data.type_name()
                            );
                        }
                        record
                    })
                    .collect(),
            })
            .collect();
        Self {
            event_number: context.event_number(),
            segments,
        }
    }
}

/// Reads an event file.
pub fn load_events(path: &Path) -> Result<Vec<EventRecord>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Writes events as pretty-printed JSON.
pub fn write_events(path: &Path, events: &[EventRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, events)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

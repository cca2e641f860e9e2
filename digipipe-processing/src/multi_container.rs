//! Joint dispatch of processors that need several containers at once.

use digipipe_core::container::AnyContainer;
use digipipe_core::context::EventContext;
use digipipe_core::error::{Error, Result};
use digipipe_core::key::{ItemKey, Key, Mask};
use digipipe_core::properties::Properties;
use digipipe_core::segment::DataSegment;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::action::EventAction;
use crate::config::MultiContainerConfig;
use crate::pool::WorkerPool;
use crate::predicate::{accept_all, Predicate};
use crate::processor::{ContainerProcessor, Input, MultiWork, Output};
use crate::worker::{find_or_add_worker, Worker};

/// Event action whose processors each consume a set of containers jointly,
/// possibly across several input masks.
///
/// A processor adopted for names `{a, b}` with input masks `{m1, m2}`
/// requires the keys `(m1,a), (m1,b), (m2,a), (m2,b)`. Per event it is
/// called once with one slot per required key as soon as any of them is
/// present; absent keys are passed as `None`.
pub struct MultiContainerProcessor {
    name: String,
    config: MultiContainerConfig,
    properties: Properties,
    pool: Arc<WorkerPool>,
    predicate: Predicate,
    workers: Vec<Worker>,
    worker_map: BTreeMap<ItemKey, Vec<usize>>,
    work_items: BTreeSet<Key>,
    initialized: bool,
}

impl MultiContainerProcessor {
    /// Creates an action with an explicit configuration.
    #[must_use]
    pub fn new(name: &str, config: MultiContainerConfig, pool: Arc<WorkerPool>) -> Self {
        Self {
            name: name.to_string(),
            config,
            properties: Properties::new(),
            pool,
            predicate: accept_all().clone(),
            workers: Vec::new(),
            worker_map: BTreeMap::new(),
            work_items: BTreeSet::new(),
            initialized: false,
        }
    }

    /// Creates an action configured from properties.
    ///
    /// # Errors
    /// Returns an error if a recognized property has the wrong type.
    pub fn from_properties(
        name: &str,
        properties: Properties,
        pool: Arc<WorkerPool>,
    ) -> Result<Self> {
        let config = MultiContainerConfig::from_properties(&properties)?;
        let mut action = Self::new(name, config, pool);
        action.properties = properties;
        Ok(action)
    }

    /// Sets the predicate passed to every processor call.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &MultiContainerConfig {
        &self.config
    }

    /// Configured input masks.
    #[must_use]
    pub fn input_masks(&self) -> &[Mask] {
        &self.config.input_masks
    }

    /// Adopts a processor requiring all of `containers` under every input mask.
    ///
    /// # Errors
    /// Returns a configuration error after initialization, without input
    /// masks or containers, or for a name clash with another processor, and
    /// [`Error::DuplicateRegistration`] if the processor was adopted before.
    pub fn adopt_processor<I, S>(
        &mut self,
        processor: Arc<dyn ContainerProcessor>,
        containers: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.initialized {
            return Err(Error::ConfigError(format!(
                "{}: cannot adopt '{}' after initialization",
                self.name,
                processor.name()
            )));
        }
        if self.config.input_masks.is_empty() {
            return Err(Error::ConfigError(format!("{}: no input masks", self.name)));
        }
        let names: Vec<S> = containers.into_iter().collect();
        if names.is_empty() {
            return Err(Error::ConfigError(format!(
                "{}: processor '{}' adopted without containers",
                self.name,
                processor.name()
            )));
        }

        let mut keys: Vec<Key> = Vec::with_capacity(names.len() * self.config.input_masks.len());
        for &mask in &self.config.input_masks {
            for name in &names {
                let key = Key::new(mask, name.as_ref());
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        if let Some(worker) = self.workers.iter().find(|w| w.wraps(&processor)) {
            return Err(Error::DuplicateRegistration {
                key: worker.keys()[0],
                processor: processor.name().to_string(),
            });
        }
        let index = find_or_add_worker(&mut self.workers, &processor)
            .map_err(|msg| Error::ConfigError(format!("{}: {msg}", self.name)))?;

        let items: BTreeSet<ItemKey> = keys.iter().map(Key::item).collect();
        for key in keys {
            self.workers[index].add_key(key);
        }
        for item in items {
            self.worker_map.entry(item).or_default().push(index);
        }
        Ok(())
    }

    /// Keys required by the worker at `worker_id`, in declaration order.
    ///
    /// # Panics
    /// Panics if `worker_id` is out of range.
    #[must_use]
    pub fn worker_keys(&self, worker_id: usize) -> &[Key] {
        self.workers[worker_id].keys()
    }

    /// All workers in adoption order.
    #[must_use]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Candidate workers for a container name hash.
    #[must_use]
    pub fn workers_for_item(&self, item: ItemKey) -> &[usize] {
        self.worker_map.get(&item).map_or(&[], Vec::as_slice)
    }

    /// Union of all required keys; filled by `initialize`.
    #[must_use]
    pub fn work_items(&self) -> &BTreeSet<Key> {
        &self.work_items
    }

    /// Properties of this action.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    fn dispatch(&self, context: &EventContext, staging: &Mutex<DataSegment>) -> Result<()> {
        let Ok(input) = context.segment(&self.config.input_segment) else {
            debug!(
                "{}: event {} has no segment '{}', nothing to dispatch",
                self.name,
                context.event_number(),
                self.config.input_segment
            );
            return Ok(());
        };
        let present: BTreeMap<Key, &dyn AnyContainer> = self
            .work_items
            .iter()
            .filter_map(|&key| input.get(key).map(|data| (key, data)))
            .collect();

        let mut eligible = BTreeSet::new();
        for key in present.keys() {
            for &index in self.workers_for_item(key.item()) {
                if self.workers[index].keys().contains(key) {
                    eligible.insert(index);
                }
            }
        }

        let output = Output::new(self.config.output_mask, staging, &self.name);
        let tasks: Vec<(&Worker, MultiWork<'_>)> = eligible
            .into_iter()
            .map(|index| {
                let worker = &self.workers[index];
                let items = worker
                    .keys()
                    .iter()
                    .map(|&key| Input::new(key, present.get(&key).copied()))
                    .collect();
                let work = MultiWork {
                    context,
                    items,
                    output: &output,
                    properties: &self.properties,
                    input_masks: &self.config.input_masks,
                };
                (worker, work)
            })
            .collect();

        debug!(
            "{}: event {} found {} of {} containers, dispatching {} workers",
            self.name,
            context.event_number(),
            present.len(),
            self.work_items.len(),
            tasks.len()
        );
        self.pool.run(&tasks, true, |(worker, work)| {
            worker
                .processor()
                .execute_joint(work, &self.predicate)
                .map_err(|e| e.in_processor(worker.name()))
        })
    }
}

impl EventAction for MultiContainerProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<()> {
        self.work_items = self
            .workers
            .iter()
            .flat_map(|w| w.keys().iter().copied())
            .collect();
        self.initialized = true;
        info!(
            "{}: {} processors over {} containers, masks {:?}",
            self.name,
            self.workers.len(),
            self.work_items.len(),
            self.config.input_masks
        );
        Ok(())
    }

    fn execute(&self, context: &mut EventContext) -> Result<()> {
        if !self.initialized {
            return Err(Error::ConfigError(format!(
                "{}: executed before initialization",
                self.name
            )));
        }
        let staging = Mutex::new(DataSegment::new(&self.config.output_segment));
        self.dispatch(context, &staging)?;
        let staged = staging
            .into_inner()
            .map_err(|_| Error::LockPoisoned(self.name.clone()))?;
        context
            .ensure_segment(&self.config.output_segment)
            .merge(staged)
    }
}

impl std::fmt::Debug for MultiContainerProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiContainerProcessor")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

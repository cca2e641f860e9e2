//! Per-event dispatch of processors bound to named containers.

use digipipe_core::context::EventContext;
use digipipe_core::error::{Error, Result};
use digipipe_core::key::Key;
use digipipe_core::properties::Properties;
use digipipe_core::segment::DataSegment;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::action::EventAction;
use crate::config::SequenceActionConfig;
use crate::pool::WorkerPool;
use crate::predicate::{accept_all, Predicate};
use crate::processor::{ContainerProcessor, Input, Output, Work};
use crate::worker::{find_or_add_worker, Worker};

/// Work handed to one worker of a [`ContainerSequenceAction`].
struct ActionWork<'a> {
    context: &'a EventContext,
    /// Every key the worker was adopted for, in adoption order.
    input_items: Vec<Input<'a>>,
    output: &'a Output<'a>,
    properties: &'a Properties,
    worker: &'a Worker,
}

impl ActionWork<'_> {
    /// Calls the worker's processor once per input item.
    fn run(&self, predicate: &Predicate) -> Result<()> {
        for input in &self.input_items {
            let work = Work {
                context: self.context,
                input: *input,
                output: self.output,
                properties: self.properties,
            };
            self.worker
                .processor()
                .execute(&work, predicate)
                .map_err(|e| e.in_processor(self.worker.name()))?;
        }
        Ok(())
    }
}

/// Event action dispatching processors by the containers they are bound to.
///
/// Each adopted processor is bound to one or more container names under the
/// configured input mask. Per event, every worker with at least one bound
/// container present receives all of its bound slots (absent ones as
/// `None`), and distinct workers run concurrently on the worker pool.
/// Outputs are staged and merged into the output segment once every worker
/// has succeeded.
pub struct ContainerSequenceAction {
    name: String,
    config: SequenceActionConfig,
    properties: Properties,
    pool: Arc<WorkerPool>,
    predicate: Predicate,
    workers: Vec<Worker>,
    registered_workers: BTreeMap<Key, Vec<usize>>,
    initialized: bool,
}

impl ContainerSequenceAction {
    /// Creates an action with an explicit configuration.
    #[must_use]
    pub fn new(name: &str, config: SequenceActionConfig, pool: Arc<WorkerPool>) -> Self {
        Self {
            name: name.to_string(),
            config,
            properties: Properties::new(),
            pool,
            predicate: accept_all().clone(),
            workers: Vec::new(),
            registered_workers: BTreeMap::new(),
            initialized: false,
        }
    }

    /// Creates an action configured from properties.
    ///
    /// The properties are also what processors see as `work.properties`.
    ///
    /// # Errors
    /// Returns an error if a recognized property has the wrong type.
    pub fn from_properties(
        name: &str,
        properties: Properties,
        pool: Arc<WorkerPool>,
    ) -> Result<Self> {
        let config = SequenceActionConfig::from_properties(&properties)?;
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
    pub fn config(&self) -> &SequenceActionConfig {
        &self.config
    }

    /// Adopts a processor for one or more container names.
    ///
    /// Adopting the same processor again extends its worker. Different
    /// processors may share a container; all of them run for it.
    ///
    /// # Errors
    /// Returns a configuration error after initialization, for an empty
    /// name list, or for a name reused by another processor instance, and
    /// [`Error::DuplicateRegistration`] if this processor is already bound
    /// to one of the containers. Nothing is registered on error.
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
        let keys: Vec<Key> = containers
            .into_iter()
            .map(|c| Key::new(self.config.input_mask, c.as_ref()))
            .collect();
        if keys.is_empty() {
            return Err(Error::ConfigError(format!(
                "{}: processor '{}' adopted without containers",
                self.name,
                processor.name()
            )));
        }

        let existing = self.workers.iter().position(|w| w.wraps(&processor));
        for (i, key) in keys.iter().enumerate() {
            let bound = existing.is_some_and(|idx| self.workers[idx].keys().contains(key));
            if bound || keys[..i].contains(key) {
                return Err(Error::DuplicateRegistration {
                    key: *key,
                    processor: processor.name().to_string(),
                });
            }
        }

        let index = find_or_add_worker(&mut self.workers, &processor)
            .map_err(|msg| Error::ConfigError(format!("{}: {msg}", self.name)))?;
        for key in keys {
            self.workers[index].add_key(key);
            self.registered_workers.entry(key).or_default().push(index);
        }
        Ok(())
    }

    /// Workers registered for `key`.
    ///
    /// With `exc` set an unregistered key is an error; otherwise it yields an
    /// empty list.
    ///
    /// # Errors
    /// Returns [`Error::UnknownWorker`] if `exc` is set and nothing is
    /// registered for `key`.
    pub fn need_registered_worker(&self, key: Key, exc: bool) -> Result<Vec<&Worker>> {
        match self.registered_workers.get(&key) {
            Some(indices) => Ok(indices.iter().map(|&i| &self.workers[i]).collect()),
            None if exc => Err(Error::UnknownWorker(key)),
            None => Ok(Vec::new()),
        }
    }

    /// All workers in adoption order.
    #[must_use]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Properties of this action.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Runs the workers for one event into a fresh staging segment.
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

        let mut eligible = vec![false; self.workers.len()];
        for key in input.keys_with_mask(self.config.input_mask) {
            let workers = self.registered_workers.get(&key);
            match workers {
                Some(indices) => indices.iter().for_each(|&i| eligible[i] = true),
                None => debug!("{}: no processor for {key}, skipped", self.name),
            }
        }

        let output = Output::new(self.config.output_mask, staging, &self.name);
        let tasks: Vec<ActionWork<'_>> = self
            .workers
            .iter()
            .zip(eligible)
            .filter(|(_, eligible)| *eligible)
            .map(|(worker, _)| ActionWork {
                context,
                input_items: worker
                    .keys()
                    .iter()
                    .map(|&key| Input::new(key, input.get(key)))
                    .collect(),
                output: &output,
                properties: &self.properties,
                worker,
            })
            .collect();

        debug!(
            "{}: event {} dispatching {} of {} workers",
            self.name,
            context.event_number(),
            tasks.len(),
            self.workers.len()
        );
        self.pool
            .run(&tasks, true, |task| task.run(&self.predicate))
    }
}

impl EventAction for ContainerSequenceAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<()> {
        for worker in &self.workers {
            for &key in worker.keys() {
                let registered = self.need_registered_worker(key, true)?;
                if !registered.iter().any(|w| w.name() == worker.name()) {
                    return Err(Error::UnknownWorker(key));
                }
            }
        }
        if self.workers.is_empty() {
            warn!("{}: no processors adopted", self.name);
        }
        if self.config.overlaps_input() {
            warn!(
                "{}: output stream equals input stream '{}'/{}; outputs are applied after the read pass",
                self.name, self.config.input_segment, self.config.input_mask
            );
        }
        self.initialized = true;
        info!(
            "{}: {} processors bound to {} containers",
            self.name,
            self.workers.len(),
            self.registered_workers.len()
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

impl std::fmt::Debug for ContainerSequenceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSequenceAction")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

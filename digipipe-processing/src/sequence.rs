//! Container sequence: several processors over one input/output pair.

use digipipe_core::error::Result;
use digipipe_core::properties::Properties;
use log::debug;
use std::sync::Arc;

use crate::config::SequenceConfig;
use crate::pool::WorkerPool;
use crate::predicate::Predicate;
use crate::processor::{ContainerProcessor, Work};
use crate::worker::Worker;

/// Runs a fixed, ordered set of processors against the same input and output.
///
/// In serial mode the processors run on the calling thread in adoption
/// order. In parallel mode they are fanned out through the worker pool and
/// serialize only while appending to the shared output.
pub struct ContainerSequence {
    name: String,
    config: SequenceConfig,
    pool: Arc<WorkerPool>,
    workers: Vec<Worker>,
}

impl ContainerSequence {
    /// Creates an empty serial sequence.
    #[must_use]
    pub fn new(name: &str, pool: Arc<WorkerPool>) -> Self {
        Self {
            name: name.to_string(),
            config: SequenceConfig::default(),
            pool,
            workers: Vec::new(),
        }
    }

    /// Creates an empty sequence configured from properties.
    ///
    /// # Errors
    /// Returns an error if a recognized property has the wrong type.
    pub fn from_properties(
        name: &str,
        properties: &Properties,
        pool: Arc<WorkerPool>,
    ) -> Result<Self> {
        Ok(Self::new(name, pool).with_config(SequenceConfig::from_properties(properties)?))
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SequenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets parallel processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Adopts a processor; adoption order is execution order.
    pub fn adopt_processor(&mut self, processor: Arc<dyn ContainerProcessor>) {
        self.workers.push(Worker::new(processor));
    }

    /// Number of adopted processors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns true if no processor was adopted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Names of the adopted processors in execution order.
    pub fn processor_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.workers.iter().map(Worker::name)
    }
}

impl ContainerProcessor for ContainerSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, work: &Work<'_>, predicate: &Predicate) -> Result<()> {
        debug!(
            "{}: {} processors on {} ({})",
            self.name,
            self.workers.len(),
            work.input_key(),
            if self.config.parallel { "parallel" } else { "serial" }
        );
        self.pool.run(&self.workers, self.config.parallel, |worker| {
            worker
                .processor()
                .execute(work, predicate)
                .map_err(|e| e.in_processor(worker.name()))
        })
    }
}

impl std::fmt::Debug for ContainerSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSequence")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("workers", &self.workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Input, Output};
    use digipipe_core::context::EventContext;
    use digipipe_core::error::Error;
    use digipipe_core::key::Key;
    use digipipe_core::segment::DataSegment;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl ContainerProcessor for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn execute(&self, _work: &Work<'_>, _predicate: &Predicate) -> Result<()> {
            self.log.lock().unwrap().push(self.name.clone());
            if self.fail {
                Err(Error::ConfigError("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn ContainerProcessor> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
            fail,
        })
    }

    fn run(sequence: &ContainerSequence) -> Result<()> {
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
        sequence.execute(&work, crate::predicate::accept_all())
    }

    #[test]
    fn test_serial_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sequence = ContainerSequence::new("seq", Arc::new(WorkerPool::sequential()));
        for name in ["a", "b", "c"] {
            sequence.adopt_processor(recorder(name, &log, false));
        }
        run(&sequence).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(sequence.processor_names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parallel_failure_names_processor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = Arc::new(WorkerPool::with_threads(2).unwrap());
        let mut sequence = ContainerSequence::new("seq", pool).with_parallel(true);
        sequence.adopt_processor(recorder("ok", &log, false));
        sequence.adopt_processor(recorder("bad", &log, true));
        sequence.adopt_processor(recorder("also-ok", &log, false));

        let err = run(&sequence).unwrap_err();
        assert!(matches!(err, Error::ProcessorFailed { ref processor, .. } if processor == "bad"));
        assert_eq!(log.lock().unwrap().len(), 3);
    }
}

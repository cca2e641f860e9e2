//! Event-level actions and the loop that drives them.

use digipipe_core::context::EventContext;
use digipipe_core::error::{Error, Result};
use log::{debug, info};
use std::sync::Arc;

use crate::pool::WorkerPool;

/// An action invoked once per event by the event loop.
pub trait EventAction: Send + Sync {
    /// Name of the action.
    fn name(&self) -> &str;

    /// Freezes the configuration and validates it.
    ///
    /// # Errors
    /// Returns a configuration error if the action must not run.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Processes one event.
    ///
    /// # Errors
    /// Returns the first failure raised while processing the event.
    fn execute(&self, context: &mut EventContext) -> Result<()>;
}

/// Runs an ordered list of event actions over a stream of events.
pub struct EventLoop {
    pool: Arc<WorkerPool>,
    actions: Vec<Box<dyn EventAction>>,
    initialized: bool,
}

impl EventLoop {
    /// Creates an empty loop sharing `pool` with its actions.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            actions: Vec::new(),
            initialized: false,
        }
    }

    /// The shared worker pool.
    #[must_use]
    pub fn pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool)
    }

    /// Appends an action; actions run in the order they were added.
    ///
    /// # Errors
    /// Returns a configuration error once the loop is initialized.
    pub fn add_action(&mut self, action: Box<dyn EventAction>) -> Result<()> {
        if self.initialized {
            return Err(Error::ConfigError(format!(
                "cannot add action '{}' after initialization",
                action.name()
            )));
        }
        self.actions.push(action);
        Ok(())
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if no action was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Initializes every action once.
    ///
    /// # Errors
    /// Returns the first action's configuration error.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        for action in &mut self.actions {
            action.initialize()?;
        }
        self.initialized = true;
        info!(
            "event loop ready: {} actions, {} worker threads",
            self.actions.len(),
            self.pool.num_threads()
        );
        Ok(())
    }

    /// Runs every action on one event, stopping at the first failure.
    ///
    /// # Errors
    /// Returns an error if the loop is not initialized or an action fails.
    pub fn process(&self, context: &mut EventContext) -> Result<()> {
        if !self.initialized {
            return Err(Error::ConfigError(
                "event loop used before initialization".to_string(),
            ));
        }
        for action in &self.actions {
            debug!("event {}: {}", context.event_number(), action.name());
            action.execute(context)?;
        }
        Ok(())
    }

    /// Processes every event in turn and returns them.
    ///
    /// # Errors
    /// Returns the first event failure.
    pub fn run<I>(&self, events: I) -> Result<Vec<EventContext>>
    where
        I: IntoIterator<Item = EventContext>,
    {
        events
            .into_iter()
            .map(|mut context| {
                self.process(&mut context)?;
                Ok(context)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        initialized: bool,
    }

    impl EventAction for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn initialize(&mut self) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn execute(&self, context: &mut EventContext) -> Result<()> {
            assert!(self.initialized);
            self.calls.fetch_add(1, Ordering::Relaxed);
            context.ensure_segment("outputs");
            Ok(())
        }
    }

    #[test]
    fn test_loop_runs_actions_per_event() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut event_loop = EventLoop::new(Arc::new(WorkerPool::sequential()));
        event_loop
            .add_action(Box::new(Counting {
                calls: Arc::clone(&calls),
                initialized: false,
            }))
            .unwrap();

        let mut context = EventContext::new(1);
        assert!(event_loop.process(&mut context).is_err());

        event_loop.initialize().unwrap();
        let events = event_loop
            .run((0..3).map(EventContext::new))
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert!(events[2].segment("outputs").is_ok());
        assert!(event_loop
            .add_action(Box::new(Counting {
                calls,
                initialized: false,
            }))
            .is_err());
    }
}

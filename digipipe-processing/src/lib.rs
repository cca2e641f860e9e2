//! digipipe-processing: Container processing engine.
//!
//! This crate dispatches per-event containers to processors:
//! - **Container sequence** - ordered processors sharing one input/output
//! - **Sequence action** - per-key dispatch of registered workers
//! - **Multi-container processor** - joint dispatch across input masks
//! - **Event loop** - ordered event actions over an event stream
//!
#![warn(missing_docs)]

mod action;
mod collect;
pub mod config;
mod multi_container;
mod pool;
pub mod predicate;
mod processor;
mod sequence;
mod sequence_action;
mod worker;

pub use action::{EventAction, EventLoop};
pub use collect::{ContainerCombine, DepositCollector};
pub use config::{MultiContainerConfig, SequenceActionConfig, SequenceConfig};
pub use multi_container::MultiContainerProcessor;
pub use pool::WorkerPool;
pub use predicate::{accept_all, Predicate};
pub use processor::{ContainerProcessor, Input, MultiWork, Output, Work};
pub use sequence::ContainerSequence;
pub use sequence_action::ContainerSequenceAction;
pub use worker::Worker;

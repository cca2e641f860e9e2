//! digipipe-core: Data model for per-event container processing.
//!
//! This crate provides the types the processing engine consumes: container
//! keys, energy deposits and their containers, data segments, the event
//! context, the property layer and the cell-ID segmentation interface.
//!

pub mod container;
pub mod context;
pub mod deposit;
pub mod error;
pub mod key;
pub mod properties;
pub mod segment;
pub mod segmentation;

pub use container::{AnyContainer, Container, DepositMapping, DepositVector, DepositView};
pub use context::EventContext;
pub use deposit::{CellId, EnergyDeposit, Position};
pub use error::{Error, Result};
pub use key::{ItemKey, Key, Mask};
pub use properties::Properties;
pub use segment::DataSegment;
pub use segmentation::{BitField, BitFieldCoder, CartesianGridXY, SegmentContext};

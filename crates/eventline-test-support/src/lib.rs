//! In-memory stores and test utilities for Eventline.

mod checkpoint;
mod clock;
mod faults;
mod log;

pub use checkpoint::InMemoryCheckpointStore;
pub use clock::{FixedClock, ManualClock};
pub use faults::{FailingCheckpointStore, FailingStreamLog, FlakyLogScanner, HangingLogScanner};
pub use log::InMemoryEventStore;

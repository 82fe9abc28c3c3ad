//! SMS-to-email relay engine.

pub mod engine;

pub use engine::{CycleReport, Outcome, RelayEngine, STARTUP_RETRY_DELAY};

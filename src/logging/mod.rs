//! Usage telemetry

pub mod usage;

pub use usage::{EventType, UsageEvent, UsageLogger};

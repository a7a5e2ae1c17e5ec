//! `sensorwatch-middleware` – Event Dispatch
//!
//! Decouples the sensor engine from whoever consumes its edge-triggered
//! events (indicator, loggers, the CLI).
//!
//! - [`bus`] – [`EventBus`][bus::EventBus]: synchronous observer registry
//!   with same-tick, registration-order delivery and per-[`Topic`][bus::Topic]
//!   filtering.

pub mod bus;

pub use bus::{EventBus, SubscriptionId, Topic};

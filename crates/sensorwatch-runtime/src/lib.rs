//! `sensorwatch-runtime` – The Frame-Driven Sensor Engine
//!
//! Wires the rule kernel, the coverage binding and the event bus into the
//! per-vessel runtime the host drives once per frame.
//!
//! # Modules
//!
//! - [`sensor_manager`] – [`SensorManager`][sensor_manager::SensorManager]:
//!   the tracked-experiment set, one state per experiment per tick, failure
//!   isolation and edge-triggered `AvailabilityChanged` / `AnyAvailable`.
//! - [`indicator`] – [`IndicatorStateMachine`][indicator::IndicatorStateMachine]:
//!   `Idle` / `Alerting` / `Busy`, reported to an
//!   [`IndicatorSink`][indicator::IndicatorSink] on transitions only.
//! - [`readiness`] – [`ReadinessGate`][readiness::ReadinessGate]: named
//!   startup checks polled once per frame, with an optional timeout.
//! - [`context`] – [`VesselContext`][context::VesselContext]: everything
//!   scoped to one active vessel, built on activation and torn down
//!   explicitly.
//! - [`engine`] – [`Engine`][engine::Engine]: readiness, activation,
//!   reference-body and active-vessel change handling, driven through the
//!   [`Host`][engine::Host] trait.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP span export.

pub mod context;
pub mod engine;
pub mod indicator;
pub mod readiness;
pub mod sensor_manager;
pub mod telemetry;

pub use context::VesselContext;
pub use engine::{Engine, EngineConfig, FrameOutcome, Host};
pub use indicator::{IndicatorSink, IndicatorStateMachine, NullSink};
pub use readiness::{Readiness, ReadinessGate};
pub use sensor_manager::SensorManager;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

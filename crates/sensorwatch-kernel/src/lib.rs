//! `sensorwatch-kernel` – Eligibility Rules & Sensor State
//!
//! Decides, for one experiment at a time, whether conditions currently favor
//! performing it.  Everything here is synchronous and side-effect free apart
//! from logging.
//!
//! # Modules
//!
//! - [`rules`] – [`RuleSet`][rules::RuleSet]: an ordered, short-circuiting
//!   AND over [`Rule`][rules::Rule]s evaluated against a read-only
//!   [`RuleContext`][rules::RuleContext], plus the built-in rules.
//! - [`rule_factory`] – [`RuleFactory`][rule_factory::RuleFactory]: builds
//!   each experiment's rule set from configuration (defaults plus
//!   per-experiment overrides).
//! - [`state_computer`] – [`SensorStateComputer`][state_computer::SensorStateComputer]:
//!   combines rule results, instrument presence and the host
//!   [`ScienceModel`][state_computer::ScienceModel] into an immutable
//!   [`SensorState`][sensorwatch_types::SensorState].

pub mod rule_factory;
pub mod rules;
pub mod state_computer;

pub use rule_factory::{RuleFactory, RuleKind};
pub use rules::{
    BiomeKnown, Rule, RuleContext, RuleSet, SituationApplies, VesselHasInstrument,
    VesselIsControllable,
};
pub use state_computer::{InvariantPolicy, ScienceModel, SensorStateComputer};

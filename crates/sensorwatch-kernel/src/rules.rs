//! [`RuleSet`] – per-experiment eligibility rule engine.
//!
//! Every registered [`Rule`] is evaluated in declaration order against a
//! read-only [`RuleContext`].  The first rule that does not pass stops the
//! evaluation; the remaining rules are not invoked.  Expensive rules (such as
//! coverage queries) should be declared last, but correctness never depends
//! on it.
//!
//! Built-in rules:
//! - [`VesselIsControllable`] – the vessel can currently be commanded.
//! - [`VesselHasInstrument`] – at least one onboard instrument runs the
//!   experiment.
//! - [`SituationApplies`] – the experiment can run in the current situation.
//! - [`BiomeKnown`] – for biome-sensitive experiments, the current location
//!   is already known to the coverage provider.

use sensorwatch_coverage::CoverageProvider;
use sensorwatch_types::{Experiment, SensorError, VesselState};

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// Read-only snapshot a [`Rule`] is evaluated against.
pub struct RuleContext<'a> {
    pub vessel: &'a VesselState,
    pub experiment: &'a Experiment,
    pub coverage: &'a dyn CoverageProvider,
}

/// A single, stateless eligibility condition.
///
/// Implement this trait to create custom rules and add them to a [`RuleSet`]
/// via [`RuleSet::add_rule`].
pub trait Rule: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Return `Ok(true)` when the condition holds for this tick's snapshot.
    ///
    /// An `Err` is treated as an evaluation failure of the whole experiment
    /// for this tick.
    fn passes(&self, ctx: &RuleContext<'_>) -> Result<bool, SensorError>;
}

// ────────────────────────────────────────────────────────────────────────────
// RuleSet
// ────────────────────────────────────────────────────────────────────────────

/// Ordered sequence of [`Rule`]s combined with logical AND.
///
/// # Example
///
/// ```
/// use sensorwatch_coverage::NoCoverage;
/// use sensorwatch_kernel::rules::{RuleContext, RuleSet, SituationApplies, VesselIsControllable};
/// use sensorwatch_types::{Experiment, Situation, VesselState};
///
/// let rules = RuleSet::new()
///     .with_rule(Box::new(VesselIsControllable))
///     .with_rule(Box::new(SituationApplies));
///
/// let exp = Experiment::new("crewReport", "Crew Report", Situation::SrfLanded.mask(), 0).unwrap();
/// let vessel = VesselState {
///     id: "v1".into(),
///     situation: Situation::SrfLanded,
///     body: "Kerbin".into(),
///     biome: None,
///     latitude: 0.0,
///     longitude: 0.0,
///     controllable: true,
///     instruments: vec![],
/// };
/// let ctx = RuleContext { vessel: &vessel, experiment: &exp, coverage: &NoCoverage };
/// assert_eq!(rules.evaluate(&ctx), Ok(true));
/// ```
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    /// Create an empty rule set.  An empty set always passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: Box<dyn Rule>) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule names in evaluation order.
    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate every rule in order, stopping at the first one that fails or
    /// errors.
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<bool, SensorError> {
        for rule in &self.rules {
            if !rule.passes(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Passes while the vessel is controllable.
pub struct VesselIsControllable;

impl Rule for VesselIsControllable {
    fn name(&self) -> &str {
        "vessel_controllable"
    }

    fn passes(&self, ctx: &RuleContext<'_>) -> Result<bool, SensorError> {
        Ok(ctx.vessel.controllable)
    }
}

/// Passes when at least one onboard instrument runs the experiment.
pub struct VesselHasInstrument;

impl Rule for VesselHasInstrument {
    fn name(&self) -> &str {
        "has_instrument"
    }

    fn passes(&self, ctx: &RuleContext<'_>) -> Result<bool, SensorError> {
        Ok(ctx.vessel.instrument_count(ctx.experiment.id()) > 0)
    }
}

/// Passes when the experiment applies to the vessel's current situation.
pub struct SituationApplies;

impl Rule for SituationApplies {
    fn name(&self) -> &str {
        "situation_applies"
    }

    fn passes(&self, ctx: &RuleContext<'_>) -> Result<bool, SensorError> {
        Ok(ctx.experiment.applies_in(ctx.vessel.situation))
    }
}

/// For experiments whose result depends on the biome in the current
/// situation, passes only when the coverage provider already knows the
/// vessel's location.  Always passes otherwise.
pub struct BiomeKnown;

impl Rule for BiomeKnown {
    fn name(&self) -> &str {
        "biome_known"
    }

    fn passes(&self, ctx: &RuleContext<'_>) -> Result<bool, SensorError> {
        if !ctx.experiment.biome_relevant(ctx.vessel.situation) {
            return Ok(true);
        }
        Ok(ctx
            .coverage
            .have_coverage(ctx.vessel.latitude, ctx.vessel.longitude))
    }
}

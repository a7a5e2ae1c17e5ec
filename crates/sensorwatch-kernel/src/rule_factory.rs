//! [`RuleFactory`] – configuration-driven construction of [`RuleSet`]s.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sensorwatch_coverage::CoverageKind;
use sensorwatch_types::{Experiment, ExperimentId};
use tracing::debug;

use crate::rules::{
    BiomeKnown, Rule, RuleSet, SituationApplies, VesselHasInstrument, VesselIsControllable,
};

/// Serializable name of a built-in rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    VesselControllable,
    HasInstrument,
    SituationApplies,
    BiomeKnown,
}

impl RuleKind {
    pub fn build(self) -> Box<dyn Rule> {
        match self {
            RuleKind::VesselControllable => Box::new(VesselIsControllable),
            RuleKind::HasInstrument => Box::new(VesselHasInstrument),
            RuleKind::SituationApplies => Box::new(SituationApplies),
            RuleKind::BiomeKnown => Box::new(BiomeKnown),
        }
    }
}

fn default_rules() -> Vec<RuleKind> {
    vec![
        RuleKind::VesselControllable,
        RuleKind::HasInstrument,
        RuleKind::SituationApplies,
    ]
}

/// Builds the [`RuleSet`] for each tracked experiment.
///
/// Experiments listed in `overrides` get exactly the rules given there;
/// every other experiment gets `default_rules`.  The coverage rule is only
/// meaningful when a coverage source is selected: with
/// [`CoverageKind::ScanSat`] it is appended (last, being the expensive one)
/// unless already present, and with [`CoverageKind::None`] it is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFactory {
    #[serde(default = "default_rules")]
    pub default_rules: Vec<RuleKind>,

    #[serde(default)]
    pub overrides: HashMap<ExperimentId, Vec<RuleKind>>,
}

impl Default for RuleFactory {
    fn default() -> Self {
        Self {
            default_rules: default_rules(),
            overrides: HashMap::new(),
        }
    }
}

impl RuleFactory {
    /// The rule kinds `experiment` will be evaluated with.
    pub fn kinds_for(&self, experiment: &Experiment, coverage: CoverageKind) -> Vec<RuleKind> {
        let mut kinds = self
            .overrides
            .get(experiment.id())
            .unwrap_or(&self.default_rules)
            .clone();
        match coverage {
            CoverageKind::ScanSat => {
                if !kinds.contains(&RuleKind::BiomeKnown) {
                    kinds.push(RuleKind::BiomeKnown);
                }
            }
            CoverageKind::None => {
                if kinds.contains(&RuleKind::BiomeKnown) {
                    debug!(
                        experiment = %experiment.id(),
                        "dropping biome_known rule: no coverage source in use"
                    );
                    kinds.retain(|k| *k != RuleKind::BiomeKnown);
                }
            }
        }
        kinds
    }

    pub fn build(&self, experiment: &Experiment, coverage: CoverageKind) -> RuleSet {
        self.kinds_for(experiment, coverage)
            .into_iter()
            .fold(RuleSet::new(), |set, kind| set.with_rule(kind.build()))
    }
}

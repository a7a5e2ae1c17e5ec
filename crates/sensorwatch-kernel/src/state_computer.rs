//! [`SensorStateComputer`] – builds one [`SensorState`] per (vessel,
//! experiment) pair.
//!
//! The computation:
//!
//! 1. resolves the [`Subject`] from the vessel and experiment,
//! 2. runs the experiment's [`RuleSet`] to obtain `conditions_met`,
//! 3. determines `onboard` independently of the rules,
//! 4. reads the science values and the exhausted flag from the
//!    [`ScienceModel`],
//! 5. derives `available = conditions_met && onboard && potential && !exhausted`.
//!
//! Negative science values are invariant violations and are handled per
//! [`InvariantPolicy`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sensorwatch_coverage::CoverageProvider;
use sensorwatch_types::{
    Experiment, ScienceValues, SensorError, SensorState, Subject, VesselState,
};
use tracing::error;

use crate::rules::{RuleContext, RuleSet};

/// Read-only view of the host's science bookkeeping.
pub trait ScienceModel {
    /// Values the subject would yield if collected now.
    fn values(&self, experiment: &Experiment, subject: &Subject) -> Result<ScienceValues, SensorError>;

    /// `true` when prior collection already used up the subject.
    fn exhausted(&self, experiment: &Experiment, subject: &Subject) -> Result<bool, SensorError>;
}

/// What to do when the science model reports a negative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvariantPolicy {
    /// Log and panic.  Default in debug builds.
    Strict,
    /// Log and clamp the offending field to zero.  Default in release builds.
    Degrade,
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            InvariantPolicy::Strict
        } else {
            InvariantPolicy::Degrade
        }
    }
}

/// Combines rule results and science lookups into a [`SensorState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorStateComputer {
    policy: InvariantPolicy,
}

impl SensorStateComputer {
    pub fn new(policy: InvariantPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> InvariantPolicy {
        self.policy
    }

    /// Compute the state of `experiment` for this tick.
    ///
    /// # Errors
    ///
    /// [`SensorError::EvaluationFailed`] when a rule or the science model
    /// fails.  The caller decides how to degrade.
    ///
    /// # Panics
    ///
    /// Under [`InvariantPolicy::Strict`], when the science model reports a
    /// negative or NaN value.
    pub fn compute(
        &self,
        vessel: &VesselState,
        experiment: &Arc<Experiment>,
        rules: &RuleSet,
        coverage: &dyn CoverageProvider,
        science: &dyn ScienceModel,
    ) -> Result<SensorState, SensorError> {
        let subject = Subject::resolve(vessel, experiment);

        let ctx = RuleContext {
            vessel,
            experiment: experiment.as_ref(),
            coverage,
        };
        let conditions_met = rules
            .evaluate(&ctx)
            .map_err(|e| evaluation_failed(experiment, e))?;

        let onboard = vessel.instrument_count(experiment.id()) > 0;

        let values = science
            .values(experiment, &subject)
            .map_err(|e| evaluation_failed(experiment, e))?;
        let values = self.sanitize(experiment, values);
        let exhausted = science
            .exhausted(experiment, &subject)
            .map_err(|e| evaluation_failed(experiment, e))?;

        let available = conditions_met && onboard && values.has_potential() && !exhausted;

        SensorState::new(
            experiment.clone(),
            subject,
            values,
            onboard,
            available,
            conditions_met,
        )
    }

    fn sanitize(&self, experiment: &Experiment, values: ScienceValues) -> ScienceValues {
        ScienceValues {
            collection: self.checked(experiment, "collection_value", values.collection),
            transmission: self.checked(experiment, "transmission_value", values.transmission),
            lab: self.checked(experiment, "lab_value", values.lab),
        }
    }

    fn checked(&self, experiment: &Experiment, field: &str, value: f32) -> f32 {
        if value >= 0.0 {
            return value;
        }
        error!(
            experiment = %experiment.id(),
            field,
            value,
            "science model reported a negative value"
        );
        match self.policy {
            InvariantPolicy::Strict => panic!(
                "invariant violated: {field} of {} must be >= 0, got {value}",
                experiment.id()
            ),
            InvariantPolicy::Degrade => 0.0,
        }
    }
}

fn evaluation_failed(experiment: &Experiment, e: SensorError) -> SensorError {
    match e {
        SensorError::EvaluationFailed { .. } => e,
        other => SensorError::EvaluationFailed {
            experiment: experiment.id().to_string(),
            details: other.to_string(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::Ordering;

    use proptest::prelude::*;
    use sensorwatch_coverage::NoCoverage;
    use sensorwatch_types::Situation;

    use super::*;
    use crate::rules::tests::{CountingRule, thermometer, vessel};
    use crate::rules::{SituationApplies, VesselIsControllable};

    /// Science model returning fixed answers.
    pub(crate) struct FixedScience {
        pub(crate) values: Result<ScienceValues, SensorError>,
        pub(crate) exhausted: bool,
    }

    impl FixedScience {
        pub(crate) fn worth(collection: f32) -> Self {
            Self {
                values: Ok(ScienceValues {
                    collection,
                    transmission: collection * 0.5,
                    lab: collection * 0.25,
                }),
                exhausted: false,
            }
        }
    }

    impl ScienceModel for FixedScience {
        fn values(&self, _: &Experiment, _: &Subject) -> Result<ScienceValues, SensorError> {
            self.values.clone()
        }

        fn exhausted(&self, _: &Experiment, _: &Subject) -> Result<bool, SensorError> {
            Ok(self.exhausted)
        }
    }

    fn default_rules() -> RuleSet {
        RuleSet::new()
            .with_rule(Box::new(VesselIsControllable))
            .with_rule(Box::new(SituationApplies))
    }

    fn compute_with(
        policy: InvariantPolicy,
        vessel: &VesselState,
        science: &dyn ScienceModel,
    ) -> Result<SensorState, SensorError> {
        SensorStateComputer::new(policy).compute(
            vessel,
            &Arc::new(thermometer()),
            &default_rules(),
            &NoCoverage,
            science,
        )
    }

    #[test]
    fn available_when_everything_lines_up() {
        let state = compute_with(InvariantPolicy::Strict, &vessel(), &FixedScience::worth(8.0)).unwrap();
        assert!(state.conditions_met());
        assert!(state.onboard());
        assert!(state.available());
        assert_eq!(state.collection_value(), 8.0);
        assert_eq!(state.subject().id, "temperatureScan@KerbinSrfLandedGrasslands");
    }

    #[test]
    fn conditions_met_without_instrument_is_surfaced() {
        let mut v = vessel();
        v.instruments.clear();
        let state = compute_with(InvariantPolicy::Strict, &v, &FixedScience::worth(8.0)).unwrap();
        assert!(state.conditions_met());
        assert!(!state.onboard());
        assert!(!state.available());
    }

    #[test]
    fn zero_value_is_not_available() {
        let state = compute_with(InvariantPolicy::Strict, &vessel(), &FixedScience::worth(0.0)).unwrap();
        assert!(state.conditions_met());
        assert!(!state.available());
    }

    #[test]
    fn exhausted_subject_is_not_available() {
        let science = FixedScience {
            exhausted: true,
            ..FixedScience::worth(8.0)
        };
        let state = compute_with(InvariantPolicy::Strict, &vessel(), &science).unwrap();
        assert!(!state.available());
    }

    #[test]
    fn failing_rules_block_availability() {
        let mut v = vessel();
        v.situation = Situation::FlyingHigh;
        let state = compute_with(InvariantPolicy::Strict, &v, &FixedScience::worth(8.0)).unwrap();
        assert!(!state.conditions_met());
        assert!(!state.available());
    }

    #[test]
    fn science_model_failure_is_an_evaluation_failure() {
        let science = FixedScience {
            values: Err(SensorError::InvariantViolation("no subject".into())),
            exhausted: false,
        };
        let err = compute_with(InvariantPolicy::Strict, &vessel(), &science).unwrap_err();
        assert!(matches!(
            err,
            SensorError::EvaluationFailed { ref experiment, .. } if experiment == "temperatureScan"
        ));
    }

    #[test]
    fn rule_error_is_an_evaluation_failure() {
        let (boom, _) = CountingRule::new(
            "boom",
            Err(SensorError::CapabilityUnavailable("gone".into())),
        );
        let rules = RuleSet::new().with_rule(boom);
        let err = SensorStateComputer::new(InvariantPolicy::Degrade)
            .compute(
                &vessel(),
                &Arc::new(thermometer()),
                &rules,
                &NoCoverage,
                &FixedScience::worth(1.0),
            )
            .unwrap_err();
        assert!(matches!(err, SensorError::EvaluationFailed { .. }));
    }

    #[test]
    fn rules_short_circuit_inside_compute() {
        let (a, _) = CountingRule::new("a", Ok(false));
        let (b, b_calls) = CountingRule::new("b", Ok(true));
        let rules = RuleSet::new().with_rule(a).with_rule(b);
        SensorStateComputer::new(InvariantPolicy::Degrade)
            .compute(
                &vessel(),
                &Arc::new(thermometer()),
                &rules,
                &NoCoverage,
                &FixedScience::worth(1.0),
            )
            .unwrap();
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn negative_value_degrades_to_zero() {
        let science = FixedScience {
            values: Ok(ScienceValues {
                collection: -3.0,
                transmission: 2.0,
                lab: 1.0,
            }),
            exhausted: false,
        };
        let state = compute_with(InvariantPolicy::Degrade, &vessel(), &science).unwrap();
        assert_eq!(state.collection_value(), 0.0);
        assert_eq!(state.transmission_value(), 2.0);
        assert!(state.available());
    }

    #[test]
    #[should_panic(expected = "invariant violated")]
    fn negative_value_panics_when_strict() {
        let science = FixedScience {
            values: Ok(ScienceValues {
                collection: 1.0,
                transmission: 1.0,
                lab: -0.1,
            }),
            exhausted: false,
        };
        let _ = compute_with(InvariantPolicy::Strict, &vessel(), &science);
    }

    #[test]
    fn policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct W {
            policy: InvariantPolicy,
        }
        let w: W = toml::from_str("policy = \"degrade\"").unwrap();
        assert_eq!(w.policy, InvariantPolicy::Degrade);
    }

    proptest! {
        #[test]
        fn produced_values_are_never_negative(
            collection in -1.0e6f32..1.0e6,
            transmission in -1.0e6f32..1.0e6,
            lab in -1.0e6f32..1.0e6,
            controllable in any::<bool>(),
        ) {
            let mut v = vessel();
            v.controllable = controllable;
            let science = FixedScience {
                values: Ok(ScienceValues { collection, transmission, lab }),
                exhausted: false,
            };
            let state = compute_with(InvariantPolicy::Degrade, &v, &science).unwrap();
            prop_assert!(state.collection_value() >= 0.0);
            prop_assert!(state.transmission_value() >= 0.0);
            prop_assert!(state.lab_value() >= 0.0);
        }
    }
}

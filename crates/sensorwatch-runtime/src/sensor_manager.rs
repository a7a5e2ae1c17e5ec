//! [`SensorManager`] – owns the tracked experiments of one vessel context
//! and turns per-tick sensor states into edge-triggered events.
//!
//! Each [`tick`](SensorManager::tick) computes exactly one [`SensorState`]
//! per tracked experiment, in tracking order, and compares it against the
//! previous tick:
//!
//! - `AvailabilityChanged` on a flip of `available`,
//! - `SensorStatusChanged` on a flip of `onboard`, `conditions_met` or
//!   `available`,
//! - `AnyAvailable` once per tick, after every experiment has been
//!   processed, only when the aggregate flipped.
//!
//! Every previous value starts at `false`.

use std::sync::Arc;

use sensorwatch_coverage::{CoverageKind, CoverageProvider};
use sensorwatch_kernel::{InvariantPolicy, RuleFactory, RuleSet, ScienceModel, SensorStateComputer};
use sensorwatch_middleware::EventBus;
use sensorwatch_types::{
    Event, EventPayload, Experiment, SensorError, SensorState, Subject, VesselState,
};
use tracing::{debug, info, warn};

const SOURCE: &str = "sensorwatch-runtime::sensor_manager";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    onboard: bool,
    conditions_met: bool,
    available: bool,
}

impl Flags {
    fn of(state: &SensorState) -> Self {
        Self {
            onboard: state.onboard(),
            conditions_met: state.conditions_met(),
            available: state.available(),
        }
    }
}

struct Tracked {
    experiment: Arc<Experiment>,
    rules: RuleSet,
    /// Rules supplied by the caller; kept across coverage-kind switches.
    custom: bool,
    previous: Flags,
}

/// Tracked-experiment set for the active vessel.
pub struct SensorManager {
    factory: RuleFactory,
    computer: SensorStateComputer,
    coverage_kind: CoverageKind,
    tracked: Vec<Tracked>,
    any_available: bool,
}

impl SensorManager {
    pub fn new(factory: RuleFactory, policy: InvariantPolicy, coverage_kind: CoverageKind) -> Self {
        Self {
            factory,
            computer: SensorStateComputer::new(policy),
            coverage_kind,
            tracked: Vec::new(),
            any_available: false,
        }
    }

    /// Start tracking `experiment` with rules built by the factory.
    ///
    /// # Errors
    ///
    /// [`SensorError::DuplicateExperiment`] when an experiment with the same
    /// id is already tracked.  Nothing is modified in that case.
    pub fn track(&mut self, experiment: Experiment) -> Result<(), SensorError> {
        self.ensure_untracked(experiment.id())?;
        let rules = self.factory.build(&experiment, self.coverage_kind);
        self.insert(experiment, rules, false);
        Ok(())
    }

    /// Start tracking `experiment` with an explicit rule set.
    ///
    /// Such rules are left alone by
    /// [`set_coverage_kind`](Self::set_coverage_kind).
    pub fn track_with_rules(&mut self, experiment: Experiment, rules: RuleSet) -> Result<(), SensorError> {
        self.ensure_untracked(experiment.id())?;
        self.insert(experiment, rules, true);
        Ok(())
    }

    /// Stop tracking `id`.  Returns `false` if it was not tracked.
    pub fn untrack(&mut self, id: &str) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|t| t.experiment.id() != id);
        let removed = self.tracked.len() != before;
        if removed {
            debug!(experiment = %id, "experiment untracked");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracked.iter().any(|t| t.experiment.id() == id)
    }

    /// Tracked experiment ids in tracking order.
    pub fn tracked_ids(&self) -> Vec<&str> {
        self.tracked.iter().map(|t| t.experiment.id()).collect()
    }

    /// Names of the rules `id` is evaluated with.
    pub fn rule_names(&self, id: &str) -> Option<Vec<&str>> {
        self.tracked
            .iter()
            .find(|t| t.experiment.id() == id)
            .map(|t| t.rules.names())
    }

    /// Aggregate published by the last `AnyAvailable` (initially `false`).
    pub fn any_available(&self) -> bool {
        self.any_available
    }

    pub fn coverage_kind(&self) -> CoverageKind {
        self.coverage_kind
    }

    /// Rebuild factory-made rule sets for a new coverage kind.
    pub fn set_coverage_kind(&mut self, kind: CoverageKind) {
        self.coverage_kind = kind;
        for t in self.tracked.iter_mut().filter(|t| !t.custom) {
            t.rules = self.factory.build(&t.experiment, kind);
        }
        debug!(%kind, "rule sets rebuilt");
    }

    /// Evaluate every tracked experiment and publish the resulting edges.
    ///
    /// An evaluation failure only affects its own experiment, which is
    /// reported unavailable for this tick.
    pub fn tick(
        &mut self,
        tick: u64,
        vessel: &VesselState,
        coverage: &dyn CoverageProvider,
        science: &dyn ScienceModel,
        bus: &mut EventBus,
    ) -> Vec<SensorState> {
        let mut states = Vec::with_capacity(self.tracked.len());

        for t in &mut self.tracked {
            let state = match self
                .computer
                .compute(vessel, &t.experiment, &t.rules, coverage, science)
            {
                Ok(state) => state,
                Err(e) => {
                    warn!(experiment = %t.experiment.id(), error = %e, "evaluation failed; reporting unavailable");
                    SensorState::unavailable(
                        t.experiment.clone(),
                        Subject::resolve(vessel, &t.experiment),
                        vessel.instrument_count(t.experiment.id()) > 0,
                    )
                }
            };

            let flags = Flags::of(&state);
            if flags.available != t.previous.available {
                info!(experiment = %t.experiment.id(), available = flags.available, tick, "availability changed");
                bus.publish(Event::new(
                    SOURCE,
                    tick,
                    EventPayload::AvailabilityChanged {
                        experiment: t.experiment.id().to_string(),
                        available: flags.available,
                    },
                ));
            }
            if flags != t.previous {
                bus.publish(Event::new(
                    SOURCE,
                    tick,
                    EventPayload::SensorStatusChanged(state.clone()),
                ));
            }
            t.previous = flags;
            states.push(state);
        }

        let any = states.iter().any(SensorState::available);
        if any != self.any_available {
            self.any_available = any;
            bus.publish(Event::new(SOURCE, tick, EventPayload::AnyAvailable(any)));
        }

        states
    }

    fn ensure_untracked(&self, id: &str) -> Result<(), SensorError> {
        if self.contains(id) {
            warn!(experiment = %id, "duplicate experiment rejected");
            return Err(SensorError::DuplicateExperiment(id.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, experiment: Experiment, rules: RuleSet, custom: bool) {
        debug!(experiment = %experiment.id(), rules = ?rules.names(), "experiment tracked");
        self.tracked.push(Tracked {
            experiment: Arc::new(experiment),
            rules,
            custom,
            previous: Flags::default(),
        });
    }
}

impl std::fmt::Debug for SensorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorManager")
            .field("tracked", &self.tracked_ids())
            .field("coverage_kind", &self.coverage_kind)
            .field("any_available", &self.any_available)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use sensorwatch_coverage::NoCoverage;
    use sensorwatch_kernel::{Rule, RuleContext, VesselIsControllable};
    use sensorwatch_types::{ScienceValues, Situation};

    use super::*;

    // ------------------------------------------------------------------ doubles

    pub(crate) fn vessel() -> VesselState {
        VesselState {
            id: "v1".into(),
            situation: Situation::SrfLanded,
            body: "Kerbin".into(),
            biome: Some("Shores".into()),
            latitude: 0.5,
            longitude: 0.5,
            controllable: true,
            instruments: vec!["crewReport".into(), "temperatureScan".into()],
        }
    }

    pub(crate) fn experiment(id: &str) -> Experiment {
        let all = Situation::ALL.iter().fold(0, |m, s| m | s.mask());
        Experiment::new(id, id, all, Situation::SrfLanded.mask()).unwrap()
    }

    /// Every subject is worth `0.0` or the given amount.
    pub(crate) struct FlatScience(pub(crate) f32);

    impl ScienceModel for FlatScience {
        fn values(&self, _: &Experiment, _: &Subject) -> Result<ScienceValues, SensorError> {
            Ok(ScienceValues {
                collection: self.0,
                transmission: self.0,
                lab: self.0,
            })
        }

        fn exhausted(&self, _: &Experiment, _: &Subject) -> Result<bool, SensorError> {
            Ok(false)
        }
    }

    struct Exploding;

    impl Rule for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn passes(&self, _: &RuleContext<'_>) -> Result<bool, SensorError> {
            Err(SensorError::CapabilityUnavailable("boom".into()))
        }
    }

    pub(crate) fn record(bus: &mut EventBus) -> Rc<RefCell<Vec<Event>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        bus.subscribe(move |e| sink.borrow_mut().push(e.clone()));
        log
    }

    fn manager() -> SensorManager {
        SensorManager::new(RuleFactory::default(), InvariantPolicy::Strict, CoverageKind::None)
    }

    fn availability_edges(log: &[Event]) -> Vec<(u64, bool)> {
        log.iter()
            .filter_map(|e| match e.payload {
                EventPayload::AvailabilityChanged { available, .. } => Some((e.tick, available)),
                _ => None,
            })
            .collect()
    }

    // ------------------------------------------------------------------ tracking

    #[test]
    fn duplicate_track_is_rejected_without_mutation() {
        let mut m = manager();
        m.track(experiment("crewReport")).unwrap();
        let err = m.track(experiment("crewReport")).unwrap_err();
        assert_eq!(err, SensorError::DuplicateExperiment("crewReport".into()));
        assert_eq!(m.len(), 1);

        let err = m
            .track_with_rules(experiment("crewReport"), RuleSet::new())
            .unwrap_err();
        assert!(matches!(err, SensorError::DuplicateExperiment(_)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn untrack_removes_experiment() {
        let mut m = manager();
        m.track(experiment("crewReport")).unwrap();
        m.track(experiment("temperatureScan")).unwrap();
        assert!(m.untrack("crewReport"));
        assert!(!m.untrack("crewReport"));
        assert_eq!(m.tracked_ids(), vec!["temperatureScan"]);
        // Re-tracking after untrack is allowed.
        m.track(experiment("crewReport")).unwrap();
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn one_state_per_experiment_in_tracking_order() {
        let mut m = manager();
        for id in ["b", "a", "c"] {
            m.track(experiment(id)).unwrap();
        }
        let mut bus = EventBus::new();
        let states = m.tick(1, &vessel(), &NoCoverage, &FlatScience(1.0), &mut bus);
        let ids: Vec<_> = states.iter().map(|s| s.experiment().id()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    // ------------------------------------------------------------------ edges

    #[test]
    fn availability_fires_only_on_flips() {
        let mut m = manager();
        m.track(experiment("crewReport")).unwrap();
        let mut bus = EventBus::new();
        let log = record(&mut bus);

        let mut v = vessel();
        for (i, controllable) in [false, false, true, true, false].into_iter().enumerate() {
            v.controllable = controllable;
            m.tick(i as u64 + 1, &v, &NoCoverage, &FlatScience(2.0), &mut bus);
        }

        assert_eq!(availability_edges(&log.borrow()), vec![(3, true), (5, false)]);
    }

    #[test]
    fn any_available_fires_once_per_aggregate_flip() {
        let mut m = manager();
        m.track(experiment("crewReport")).unwrap();
        m.track(experiment("temperatureScan")).unwrap();
        let mut bus = EventBus::new();
        let log = record(&mut bus);

        let v = vessel();
        m.tick(1, &v, &NoCoverage, &FlatScience(0.0), &mut bus);
        m.tick(2, &v, &NoCoverage, &FlatScience(1.0), &mut bus);
        m.tick(3, &v, &NoCoverage, &FlatScience(1.0), &mut bus);
        m.tick(4, &v, &NoCoverage, &FlatScience(0.0), &mut bus);

        let any: Vec<_> = log
            .borrow()
            .iter()
            .filter_map(|e| match e.payload {
                EventPayload::AnyAvailable(v) => Some((e.tick, v)),
                _ => None,
            })
            .collect();
        assert_eq!(any, vec![(2, true), (4, false)]);
    }

    #[test]
    fn any_available_is_published_after_per_experiment_events() {
        let mut m = manager();
        m.track(experiment("crewReport")).unwrap();
        let mut bus = EventBus::new();
        let log = record(&mut bus);
        m.tick(1, &vessel(), &NoCoverage, &FlatScience(1.0), &mut bus);

        let log = log.borrow();
        assert!(matches!(log.last().map(|e| &e.payload), Some(EventPayload::AnyAvailable(true))));
    }

    #[test]
    fn unavailable_first_tick_is_silent() {
        let mut m = manager();
        m.track(experiment("crewReport")).unwrap();
        let mut bus = EventBus::new();
        let log = record(&mut bus);
        let mut v = vessel();
        v.instruments.clear();
        v.controllable = false;
        m.tick(1, &v, &NoCoverage, &FlatScience(0.0), &mut bus);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn status_change_reports_onboard_flip_without_availability_edge() {
        let mut m = manager();
        m.track_with_rules(experiment("crewReport"), RuleSet::new()).unwrap();
        let mut bus = EventBus::new();
        let log = record(&mut bus);

        // Conditions met, instrument missing: status changes, availability does not.
        let mut v = vessel();
        v.instruments.clear();
        m.tick(1, &v, &NoCoverage, &FlatScience(1.0), &mut bus);

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        match &log[0].payload {
            EventPayload::SensorStatusChanged(state) => {
                assert!(state.conditions_met());
                assert!(!state.onboard());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    // ------------------------------------------------------------------ isolation

    #[test]
    fn failing_rule_is_isolated_to_its_experiment() {
        let mut m = manager();
        m.track_with_rules(
            experiment("crewReport"),
            RuleSet::new().with_rule(Box::new(Exploding)),
        )
        .unwrap();
        m.track_with_rules(
            experiment("temperatureScan"),
            RuleSet::new().with_rule(Box::new(VesselIsControllable)),
        )
        .unwrap();

        let mut bus = EventBus::new();
        let states = m.tick(1, &vessel(), &NoCoverage, &FlatScience(3.0), &mut bus);

        assert_eq!(states.len(), 2);
        assert!(!states[0].conditions_met());
        assert!(!states[0].available());
        assert!(states[0].onboard());
        assert!(states[1].conditions_met());
        assert!(states[1].available());
        assert_eq!(states[1].collection_value(), 3.0);
    }

    // ------------------------------------------------------------------ coverage kind

    #[test]
    fn coverage_kind_switch_rebuilds_factory_rules_only() {
        let mut m = manager();
        m.track(experiment("crewReport")).unwrap();
        m.track_with_rules(experiment("custom"), RuleSet::new()).unwrap();

        m.set_coverage_kind(CoverageKind::ScanSat);
        assert_eq!(
            m.rule_names("crewReport").unwrap().last().copied(),
            Some("biome_known")
        );
        assert!(m.rule_names("custom").unwrap().is_empty());

        m.set_coverage_kind(CoverageKind::None);
        assert!(!m.rule_names("crewReport").unwrap().contains(&"biome_known"));
    }
}

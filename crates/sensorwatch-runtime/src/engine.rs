//! [`Engine`] – the host-facing frame driver.
//!
//! The host calls [`Engine::frame`] once per simulation frame.  The engine:
//!
//! 1. polls the [`ReadinessGate`] until the host's science subsystem and an
//!    active vessel are available.  When SCANsat coverage is selected and the
//!    plugin is installed, it also waits a bounded number of frames for the
//!    plugin's data object; a missing plugin is not waited for,
//! 2. activates a [`VesselContext`] for the active vessel,
//! 3. on every later frame, forwards reference-body changes and runs one
//!    evaluation pass,
//! 4. tears the context down and starts waiting again when the active vessel
//!    changes or disappears.
//!
//! Nothing blocks: a frame that is not ready returns immediately.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use sensorwatch_coverage::{CapabilityProbe, CoverageKind, ModuleRegistry};
use sensorwatch_kernel::{InvariantPolicy, RuleFactory, ScienceModel};
use sensorwatch_middleware::{EventBus, Topic};
use sensorwatch_types::{
    Event, Experiment, IndicatorState, SensorError, SensorState, VesselState,
};
use tracing::{debug, info};

use crate::context::VesselContext;
use crate::indicator::{IndicatorSink, IndicatorStateMachine};
use crate::readiness::{Readiness, ReadinessGate};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Frames to wait for an installed coverage plugin's data object.
pub const DEFAULT_PLUGIN_WAIT_TICKS: u64 = 120;

/// Engine settings, read once per context activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Coverage source used by the `biome_known` rule.
    pub coverage_provider: CoverageKind,
    /// Handling of negative science values.
    pub invariant_policy: InvariantPolicy,
    /// Frames to wait for an installed coverage plugin's data object before
    /// activating without it.
    pub readiness_timeout_ticks: u64,
    /// Default rule list and per-experiment overrides.
    pub rules: RuleFactory,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coverage_provider: CoverageKind::default(),
            invariant_policy: InvariantPolicy::default(),
            readiness_timeout_ticks: DEFAULT_PLUGIN_WAIT_TICKS,
            rules: RuleFactory::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host boundary
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the engine reads from the host, once per frame.
pub trait Host {
    /// `true` once the host's science bookkeeping can be queried.
    fn science_ready(&self) -> bool;

    /// Snapshot of the active vessel, if there is one.
    fn active_vessel(&self) -> Option<VesselState>;

    fn science(&self) -> &dyn ScienceModel;

    /// The host's loaded modules, probed for the coverage plugin.
    fn modules(&self) -> &ModuleRegistry;
}

/// What a single [`Engine::frame`] did.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// Still waiting for the named readiness check.
    Waiting { pending: String },
    /// One evaluation pass ran; one state per tracked experiment.
    Ticked(Vec<SensorState>),
}

type Observer = Rc<RefCell<dyn FnMut(&Event)>>;

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Drives vessel contexts from host frames.
///
/// # Example
///
/// ```
/// use sensorwatch_coverage::ModuleRegistry;
/// use sensorwatch_kernel::ScienceModel;
/// use sensorwatch_runtime::engine::{Engine, EngineConfig, FrameOutcome, Host};
/// use sensorwatch_runtime::indicator::NullSink;
/// use sensorwatch_types::{Experiment, ScienceValues, SensorError, Subject, VesselState};
///
/// struct Empty(ModuleRegistry);
///
/// impl ScienceModel for Empty {
///     fn values(&self, _: &Experiment, _: &Subject) -> Result<ScienceValues, SensorError> {
///         Ok(ScienceValues::default())
///     }
///     fn exhausted(&self, _: &Experiment, _: &Subject) -> Result<bool, SensorError> {
///         Ok(false)
///     }
/// }
///
/// impl Host for Empty {
///     fn science_ready(&self) -> bool { true }
///     fn active_vessel(&self) -> Option<VesselState> { None }
///     fn science(&self) -> &dyn ScienceModel { self }
///     fn modules(&self) -> &ModuleRegistry { &self.0 }
/// }
///
/// let host = Empty(ModuleRegistry::new());
/// let mut engine = Engine::new(EngineConfig::default(), vec![], Box::new(NullSink));
/// let outcome = engine.frame(&host).unwrap();
/// assert!(matches!(outcome, FrameOutcome::Waiting { ref pending } if pending == "active vessel"));
/// ```
pub struct Engine<H: Host + 'static> {
    config: EngineConfig,
    experiments: Vec<Experiment>,
    indicator: Rc<RefCell<IndicatorStateMachine>>,
    observers: Vec<(Option<Topic>, Observer)>,
    gate: ReadinessGate<H>,
    context: Option<VesselContext>,
    frames: u64,
}

impl<H: Host + 'static> Engine<H> {
    /// Create an engine that will track `experiments` on every active vessel.
    ///
    /// The indicator starts `Busy` and stays so until the first context is
    /// active.
    pub fn new(config: EngineConfig, experiments: Vec<Experiment>, sink: Box<dyn IndicatorSink>) -> Self {
        let mut indicator = IndicatorStateMachine::new(sink);
        indicator.begin_busy();
        let gate = readiness_gate(&config);
        Self {
            config,
            experiments,
            indicator: Rc::new(RefCell::new(indicator)),
            observers: Vec::new(),
            gate,
            context: None,
            frames: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frames processed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn indicator_state(&self) -> IndicatorState {
        self.indicator.borrow().state()
    }

    /// The active context, if any.
    pub fn context(&self) -> Option<&VesselContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut VesselContext> {
        self.context.as_mut()
    }

    /// Register an observer for events of every current and future context.
    ///
    /// `topic = None` observes everything.
    pub fn subscribe<F>(&mut self, topic: Option<Topic>, observer: F)
    where
        F: FnMut(&Event) + 'static,
    {
        let observer: Observer = Rc::new(RefCell::new(observer));
        if let Some(ctx) = self.context.as_mut() {
            attach(ctx.bus_mut(), topic, &observer);
        }
        self.observers.push((topic, observer));
    }

    /// Switch the coverage source.  Applies to the active context
    /// immediately and to every later one.
    pub fn set_coverage_kind(&mut self, host: &H, kind: CoverageKind) {
        self.config.coverage_provider = kind;
        match self.context.as_mut() {
            Some(ctx) => ctx.set_coverage_kind(host.modules(), kind),
            None => self.gate = readiness_gate(&self.config),
        }
    }

    /// Advance the engine by one host frame.
    ///
    /// # Errors
    ///
    /// [`SensorError::DuplicateExperiment`] when the experiment catalog
    /// cannot be tracked.  Every other failure is absorbed.
    pub fn frame(&mut self, host: &H) -> Result<FrameOutcome, SensorError> {
        self.frames += 1;
        let vessel = host.active_vessel();

        if let Some(ctx) = self.context.as_mut() {
            match vessel.as_ref() {
                Some(v) if v.id == ctx.vessel_id() => {
                    if v.body != ctx.body() {
                        ctx.on_reference_body_changed(host.modules(), &v.body);
                    }
                    return Ok(FrameOutcome::Ticked(ctx.tick(v, host.science(), host.modules())));
                }
                Some(v) => info!(from = %ctx.vessel_id(), to = %v.id, "active vessel changed"),
                None => info!(vessel = %ctx.vessel_id(), "active vessel lost"),
            }
            self.stop();
        }

        if let Readiness::Waiting { pending } = self.gate.poll(host) {
            debug!(%pending, frame = self.frames, "waiting for host readiness");
            return Ok(FrameOutcome::Waiting { pending });
        }
        let Some(vessel) = vessel else {
            return Ok(FrameOutcome::Waiting {
                pending: ACTIVE_VESSEL.to_string(),
            });
        };

        let mut bus = EventBus::new();
        for (topic, observer) in &self.observers {
            attach(&mut bus, *topic, observer);
        }
        let ctx = self.context.insert(VesselContext::activate(
            &self.config,
            &vessel,
            &self.experiments,
            host.modules(),
            bus,
            self.indicator.clone(),
        )?);
        Ok(FrameOutcome::Ticked(ctx.tick(&vessel, host.science(), host.modules())))
    }

    /// Tear down the active context, if any, and wait for readiness again.
    pub fn stop(&mut self) {
        if let Some(ctx) = self.context.take() {
            ctx.teardown();
        }
        self.gate = readiness_gate(&self.config);
    }
}

impl<H: Host + 'static> std::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("frames", &self.frames)
            .field("experiments", &self.experiments.len())
            .field("observers", &self.observers.len())
            .field("gate", &self.gate)
            .field("context", &self.context)
            .finish()
    }
}

const SCIENCE_SUBSYSTEM: &str = "science subsystem";
const ACTIVE_VESSEL: &str = "active vessel";
const COVERAGE_DATA: &str = "coverage plugin data";

fn readiness_gate<H: Host + 'static>(config: &EngineConfig) -> ReadinessGate<H> {
    let gate = ReadinessGate::new(Some(config.readiness_timeout_ticks))
        .require(SCIENCE_SUBSYSTEM, |host: &H| host.science_ready())
        .require(ACTIVE_VESSEL, |host: &H| host.active_vessel().is_some());
    match config.coverage_provider {
        CoverageKind::None => gate,
        CoverageKind::ScanSat => {
            let probe = CapabilityProbe::default();
            gate.prefer(COVERAGE_DATA, move |host: &H| {
                let handle = probe.probe(host.modules());
                // Not installed: nothing to wait for.
                !handle.is_found()
                    || host
                        .active_vessel()
                        .is_some_and(|v| probe.bind(&handle, &v.body).is_ok())
            })
        }
    }
}

fn attach(bus: &mut EventBus, topic: Option<Topic>, observer: &Observer) {
    let observer = observer.clone();
    let forward = move |e: &Event| (&mut *observer.borrow_mut())(e);
    match topic {
        Some(topic) => bus.subscribe_to(topic, forward),
        None => bus.subscribe(forward),
    };
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use sensorwatch_types::{EventPayload, ProviderState};

    use super::*;
    use crate::context::tests::scansat_registry;
    use crate::indicator::NullSink;
    use crate::sensor_manager::tests::{FlatScience, experiment, vessel};

    struct TestHost {
        ready: Cell<bool>,
        vessel: RefCell<Option<VesselState>>,
        science: FlatScience,
        modules: ModuleRegistry,
    }

    impl TestHost {
        fn new(modules: ModuleRegistry) -> Self {
            Self {
                ready: Cell::new(true),
                vessel: RefCell::new(Some(vessel())),
                science: FlatScience(1.0),
                modules,
            }
        }

        fn with_vessel(&self, f: impl FnOnce(&mut Option<VesselState>)) {
            f(&mut *self.vessel.borrow_mut());
        }
    }

    impl Host for TestHost {
        fn science_ready(&self) -> bool {
            self.ready.get()
        }

        fn active_vessel(&self) -> Option<VesselState> {
            self.vessel.borrow().clone()
        }

        fn science(&self) -> &dyn ScienceModel {
            &self.science
        }

        fn modules(&self) -> &ModuleRegistry {
            &self.modules
        }
    }

    fn engine(config: EngineConfig) -> Engine<TestHost> {
        Engine::new(config, vec![experiment("crewReport")], Box::new(NullSink))
    }

    fn waiting_on(outcome: FrameOutcome) -> String {
        match outcome {
            FrameOutcome::Waiting { pending } => pending,
            FrameOutcome::Ticked(_) => panic!("expected to wait"),
        }
    }

    #[test]
    fn waits_for_science_then_activates() {
        let host = TestHost::new(ModuleRegistry::new());
        host.ready.set(false);
        let mut e = engine(EngineConfig::default());

        assert_eq!(waiting_on(e.frame(&host).unwrap()), SCIENCE_SUBSYSTEM);
        assert_eq!(e.indicator_state(), IndicatorState::Busy);

        host.ready.set(true);
        match e.frame(&host).unwrap() {
            FrameOutcome::Ticked(states) => assert!(states[0].available()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(e.indicator_state(), IndicatorState::Alerting);
        assert_eq!(e.context().map(|c| c.vessel_id()), Some("v1"));
    }

    fn scansat() -> EngineConfig {
        EngineConfig {
            coverage_provider: CoverageKind::ScanSat,
            ..EngineConfig::default()
        }
    }

    /// Host whose installed plugin has no data object for the vessel's body.
    fn host_without_plugin_data() -> TestHost {
        let host = TestHost::new(scansat_registry());
        host.with_vessel(|v| {
            if let Some(v) = v {
                v.body = "Eve".into();
            }
        });
        host
    }

    #[test]
    fn scansat_without_plugin_activates_immediately() {
        let host = TestHost::new(ModuleRegistry::new());
        let mut e = engine(scansat());

        match e.frame(&host).unwrap() {
            FrameOutcome::Ticked(states) => assert!(states[0].available()),
            other => panic!("unexpected {other:?}"),
        }
        let ctx = e.context().unwrap();
        assert_eq!(ctx.coverage().state(), ProviderState::Unbound);
        assert_eq!(e.indicator_state(), IndicatorState::Alerting);
    }

    #[test]
    fn plugin_wait_times_out_into_fallback() {
        let host = host_without_plugin_data();
        let config = EngineConfig {
            readiness_timeout_ticks: 3,
            ..scansat()
        };
        let mut e = engine(config);
        assert_eq!(waiting_on(e.frame(&host).unwrap()), COVERAGE_DATA);
        assert_eq!(waiting_on(e.frame(&host).unwrap()), COVERAGE_DATA);
        assert!(matches!(e.frame(&host).unwrap(), FrameOutcome::Ticked(_)));
        let ctx = e.context().unwrap();
        assert_eq!(ctx.coverage().state(), ProviderState::Unbound);
    }

    #[test]
    fn default_plugin_wait_is_bounded() {
        let host = host_without_plugin_data();
        let mut e = engine(scansat());
        let ticked = (0..=DEFAULT_PLUGIN_WAIT_TICKS)
            .position(|_| matches!(e.frame(&host).unwrap(), FrameOutcome::Ticked(_)));
        assert_eq!(ticked, Some(DEFAULT_PLUGIN_WAIT_TICKS as usize - 1));
        assert_ne!(e.indicator_state(), IndicatorState::Busy);
    }

    #[test]
    fn unbound_scansat_evaluates_like_none() {
        let host = TestHost::new(ModuleRegistry::new());
        let mut with_scansat = engine(scansat());
        let mut with_none = engine(EngineConfig::default());

        for _ in 0..20 {
            let a = with_scansat.frame(&host).unwrap();
            let b = with_none.frame(&host).unwrap();
            match (a, b) {
                (FrameOutcome::Ticked(a), FrameOutcome::Ticked(b)) => {
                    assert_eq!(a[0].available(), b[0].available());
                    assert!(a[0].available());
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn plugin_present_binds_on_activation() {
        let host = TestHost::new(scansat_registry());
        let config = EngineConfig {
            coverage_provider: CoverageKind::ScanSat,
            ..EngineConfig::default()
        };
        let mut e = engine(config);
        assert!(matches!(e.frame(&host).unwrap(), FrameOutcome::Ticked(_)));
        assert_eq!(e.context().unwrap().coverage().state(), ProviderState::Bound);
    }

    #[test]
    fn body_change_is_forwarded() {
        let host = TestHost::new(scansat_registry());
        let config = EngineConfig {
            coverage_provider: CoverageKind::ScanSat,
            ..EngineConfig::default()
        };
        let mut e = engine(config);
        e.frame(&host).unwrap();

        host.with_vessel(|v| {
            if let Some(v) = v {
                v.body = "Mun".into();
            }
        });
        e.frame(&host).unwrap();
        let ctx = e.context().unwrap();
        assert_eq!(ctx.body(), "Mun");
        assert_eq!(ctx.coverage().bind_attempts(), 2);
        assert_eq!(ctx.ticks(), 2);
    }

    #[test]
    fn vessel_switch_rebuilds_context() {
        let host = TestHost::new(ModuleRegistry::new());
        let mut e = engine(EngineConfig::default());
        e.frame(&host).unwrap();
        e.frame(&host).unwrap();
        assert_eq!(e.context().unwrap().ticks(), 2);

        host.with_vessel(|v| {
            if let Some(v) = v {
                v.id = "v2".into();
            }
        });
        e.frame(&host).unwrap();
        let ctx = e.context().unwrap();
        assert_eq!(ctx.vessel_id(), "v2");
        assert_eq!(ctx.ticks(), 1);
    }

    #[test]
    fn vessel_loss_tears_down() {
        let host = TestHost::new(ModuleRegistry::new());
        let mut e = engine(EngineConfig::default());
        e.frame(&host).unwrap();

        host.with_vessel(|v| *v = None);
        assert_eq!(waiting_on(e.frame(&host).unwrap()), ACTIVE_VESSEL);
        assert!(e.context().is_none());
        assert_eq!(e.indicator_state(), IndicatorState::Busy);
    }

    #[test]
    fn observers_follow_context_rebuilds() {
        let host = TestHost::new(ModuleRegistry::new());
        let mut e = engine(EngineConfig::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            e.subscribe(Some(Topic::Availability), move |ev| {
                if let EventPayload::AnyAvailable(v) = ev.payload {
                    seen.borrow_mut().push(v);
                }
            });
        }

        e.frame(&host).unwrap();
        host.with_vessel(|v| {
            if let Some(v) = v {
                v.id = "v2".into();
            }
        });
        e.frame(&host).unwrap();

        // One rising edge per context.
        assert_eq!(*seen.borrow(), vec![true, true]);
    }

    #[test]
    fn duplicate_catalog_surfaces_from_frame() {
        let host = TestHost::new(ModuleRegistry::new());
        let mut e: Engine<TestHost> = Engine::new(
            EngineConfig::default(),
            vec![experiment("crewReport"), experiment("crewReport")],
            Box::new(NullSink),
        );
        assert!(matches!(
            e.frame(&host),
            Err(SensorError::DuplicateExperiment(_))
        ));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let raw = r#"
            coverage_provider = "scansat"
            readiness_timeout_ticks = 120

            [rules]
            default_rules = ["vessel_controllable"]
        "#;
        let c: EngineConfig = toml::from_str(raw).unwrap();
        assert_eq!(c.coverage_provider, CoverageKind::ScanSat);
        assert_eq!(c.readiness_timeout_ticks, 120);
        assert_eq!(c.rules.default_rules.len(), 1);
        assert_eq!(c.invariant_policy, InvariantPolicy::default());
    }
}

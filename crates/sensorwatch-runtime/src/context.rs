//! [`VesselContext`] – every per-vessel component, owned by one value.
//!
//! A context is built when a vessel becomes active and dropped, through
//! [`VesselContext::teardown`], when it stops being active.  Nothing it owns
//! outlives it: the tracked experiments, their rule sets, the coverage
//! binding and the event bus all go away together.  The indicator is shared
//! with the engine because it outlives individual contexts.

use std::cell::RefCell;
use std::rc::Rc;

use sensorwatch_coverage::{CoverageBinding, CoverageKind, ModuleRegistry};
use sensorwatch_kernel::ScienceModel;
use sensorwatch_middleware::{EventBus, Topic};
use sensorwatch_types::{
    BodyId, Event, EventPayload, Experiment, ProviderState, SensorError, SensorState, VesselState,
};
use tracing::{info, instrument};

use crate::engine::EngineConfig;
use crate::indicator::IndicatorStateMachine;
use crate::sensor_manager::SensorManager;

const SOURCE: &str = "sensorwatch-runtime::context";

/// Per-active-vessel arena.
pub struct VesselContext {
    vessel_id: String,
    body: BodyId,
    manager: SensorManager,
    coverage: CoverageBinding,
    bus: EventBus,
    indicator: Rc<RefCell<IndicatorStateMachine>>,
    ticks: u64,
}

impl VesselContext {
    /// Build the context for `vessel`.
    ///
    /// The indicator is `Busy` for the duration of the setup.  Coverage is
    /// bound to the vessel's reference body and the resulting provider state
    /// is published on `bus` (tick 0).  Rule sets are built for the provider
    /// actually bound, so a selected but unavailable plugin evaluates like
    /// [`CoverageKind::None`].
    ///
    /// # Errors
    ///
    /// [`SensorError::DuplicateExperiment`] when `experiments` lists an id
    /// twice.  No context is created.
    #[instrument(skip_all, fields(vessel = %vessel.id, body = %vessel.body))]
    pub fn activate(
        config: &EngineConfig,
        vessel: &VesselState,
        experiments: &[Experiment],
        registry: &ModuleRegistry,
        mut bus: EventBus,
        indicator: Rc<RefCell<IndicatorStateMachine>>,
    ) -> Result<Self, SensorError> {
        indicator.borrow_mut().begin_busy();

        let mut manager = SensorManager::new(
            config.rules.clone(),
            config.invariant_policy,
            CoverageKind::None,
        );
        for experiment in experiments {
            if let Err(e) = manager.track(experiment.clone()) {
                indicator.borrow_mut().end_busy(false);
                return Err(e);
            }
        }

        {
            let indicator = indicator.clone();
            bus.subscribe_to(Topic::Availability, move |e| indicator.borrow_mut().observe(e));
        }

        let mut ctx = Self {
            vessel_id: vessel.id.clone(),
            body: vessel.body.clone(),
            manager,
            coverage: CoverageBinding::new(config.coverage_provider),
            bus,
            indicator,
            ticks: 0,
        };
        let transitions = ctx.coverage.on_body_changed(registry, &vessel.body);
        ctx.publish_provider(transitions);

        info!(
            experiments = ctx.manager.len(),
            coverage = %ctx.coverage.kind(),
            provider = ?ctx.coverage.state(),
            "vessel context active"
        );
        ctx.indicator.borrow_mut().end_busy(false);
        Ok(ctx)
    }

    pub fn vessel_id(&self) -> &str {
        &self.vessel_id
    }

    /// Reference body the coverage binding was last asked for.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Number of ticks evaluated so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn manager(&self) -> &SensorManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SensorManager {
        &mut self.manager
    }

    pub fn coverage(&self) -> &CoverageBinding {
        &self.coverage
    }

    /// The context's bus, for registering further observers.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Run one evaluation pass.
    ///
    /// Every experiment sees the same coverage provider; provider changes
    /// requested or caused during the pass are applied and published after
    /// it.
    pub fn tick(
        &mut self,
        vessel: &VesselState,
        science: &dyn ScienceModel,
        registry: &ModuleRegistry,
    ) -> Vec<SensorState> {
        self.ticks += 1;
        self.coverage.begin_pass();
        let states = self.manager.tick(
            self.ticks,
            vessel,
            self.coverage.provider(),
            science,
            &mut self.bus,
        );
        let transitions = self.coverage.end_pass(registry);
        self.publish_provider(transitions);
        states
    }

    /// The vessel's reference body changed: rebind coverage.
    pub fn on_reference_body_changed(&mut self, registry: &ModuleRegistry, body: &str) {
        if body == self.body {
            return;
        }
        info!(from = %self.body, to = %body, "reference body changed");
        self.body = body.to_string();
        let transitions = self.coverage.on_body_changed(registry, body);
        self.publish_provider(transitions);
    }

    /// Switch the coverage source at runtime, rebuilding affected rule sets.
    pub fn set_coverage_kind(&mut self, registry: &ModuleRegistry, kind: CoverageKind) {
        let transitions = self.coverage.set_kind(registry, kind);
        self.publish_provider(transitions);
    }

    /// Tear the context down.  The indicator stays `Busy` until the next
    /// context is activated.
    pub fn teardown(self) {
        self.indicator.borrow_mut().begin_busy();
        info!(
            vessel = %self.vessel_id,
            ticks = self.ticks,
            events = self.bus.published(),
            "vessel context torn down"
        );
    }

    /// Coverage kind the rules are built for: the selected one while bound,
    /// `None` otherwise.
    fn effective_kind(&self) -> CoverageKind {
        match self.coverage.state() {
            ProviderState::Bound => self.coverage.kind(),
            ProviderState::Unbound => CoverageKind::None,
        }
    }

    fn publish_provider(&mut self, transitions: Vec<ProviderState>) {
        let kind = self.effective_kind();
        if kind != self.manager.coverage_kind() {
            self.manager.set_coverage_kind(kind);
        }
        for state in transitions {
            self.bus.publish(Event::new(
                SOURCE,
                self.ticks,
                EventPayload::CoverageProviderStateChanged(state),
            ));
        }
    }
}

impl std::fmt::Debug for VesselContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VesselContext")
            .field("vessel_id", &self.vessel_id)
            .field("body", &self.body)
            .field("ticks", &self.ticks)
            .field("manager", &self.manager)
            .finish()
    }
}

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of an experiment definition (e.g. `"temperatureScan"`).
pub type ExperimentId = String;

/// Identifier of a celestial reference body (e.g. `"Kerbin"`).
pub type BodyId = String;

/// Flight situation of the active vessel.
///
/// Each variant maps to one bit so experiments can describe where they apply
/// with a single mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Situation {
    SrfLanded,
    SrfSplashed,
    FlyingLow,
    FlyingHigh,
    InSpaceLow,
    InSpaceHigh,
}

impl Situation {
    /// Every situation, in mask-bit order.
    pub const ALL: [Situation; 6] = [
        Situation::SrfLanded,
        Situation::SrfSplashed,
        Situation::FlyingLow,
        Situation::FlyingHigh,
        Situation::InSpaceLow,
        Situation::InSpaceHigh,
    ];

    /// The bit this situation occupies in an experiment mask.
    pub fn mask(self) -> u32 {
        match self {
            Situation::SrfLanded => 1,
            Situation::SrfSplashed => 2,
            Situation::FlyingLow => 4,
            Situation::FlyingHigh => 8,
            Situation::InSpaceLow => 16,
            Situation::InSpaceHigh => 32,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Situation::SrfLanded => "SrfLanded",
            Situation::SrfSplashed => "SrfSplashed",
            Situation::FlyingLow => "FlyingLow",
            Situation::FlyingHigh => "FlyingHigh",
            Situation::InSpaceLow => "InSpaceLow",
            Situation::InSpaceHigh => "InSpaceHigh",
        }
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Experiment
// ────────────────────────────────────────────────────────────────────────────

/// A unit of potential measurement.  Immutable once loaded.
///
/// Construct through [`Experiment::new`] (or deserialize, which runs the same
/// validation) so the id and title are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ExperimentDef")]
pub struct Experiment {
    id: ExperimentId,
    title: String,
    situation_mask: u32,
    biome_mask: u32,
}

/// Unvalidated on-disk shape of an [`Experiment`].
#[derive(Deserialize)]
struct ExperimentDef {
    id: ExperimentId,
    title: String,
    situation_mask: u32,
    #[serde(default)]
    biome_mask: u32,
}

impl TryFrom<ExperimentDef> for Experiment {
    type Error = SensorError;

    fn try_from(def: ExperimentDef) -> Result<Self, Self::Error> {
        Experiment::new(def.id, def.title, def.situation_mask, def.biome_mask)
    }
}

impl Experiment {
    /// Create an experiment definition.
    ///
    /// `situation_mask` selects the situations the experiment can run in;
    /// `biome_mask` selects the situations in which the current biome is part
    /// of the result (and therefore of the [`Subject`]).
    ///
    /// # Errors
    ///
    /// [`SensorError::InvariantViolation`] when `id` or `title` is empty.
    pub fn new(
        id: impl Into<ExperimentId>,
        title: impl Into<String>,
        situation_mask: u32,
        biome_mask: u32,
    ) -> Result<Self, SensorError> {
        let id = id.into();
        let title = title.into();
        if id.trim().is_empty() {
            return Err(SensorError::InvariantViolation(
                "experiment id must not be empty".to_string(),
            ));
        }
        if title.trim().is_empty() {
            return Err(SensorError::InvariantViolation(format!(
                "experiment '{id}' has an empty title"
            )));
        }
        Ok(Self {
            id,
            title,
            situation_mask,
            biome_mask,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn situation_mask(&self) -> u32 {
        self.situation_mask
    }

    pub fn biome_mask(&self) -> u32 {
        self.biome_mask
    }

    /// `true` when the experiment can be performed in `situation`.
    pub fn applies_in(&self, situation: Situation) -> bool {
        self.situation_mask & situation.mask() != 0
    }

    /// `true` when results in `situation` depend on the current biome.
    pub fn biome_relevant(&self, situation: Situation) -> bool {
        self.biome_mask & situation.mask() != 0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vessel & subject
// ────────────────────────────────────────────────────────────────────────────

/// Per-tick snapshot of the active vessel, read from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselState {
    pub id: String,
    pub situation: Situation,
    pub body: BodyId,
    /// `None` when the host cannot resolve a biome at the current position.
    #[serde(default)]
    pub biome: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    pub controllable: bool,
    /// Experiment ids provided by the instruments currently onboard, one
    /// entry per instrument.
    #[serde(default)]
    pub instruments: Vec<ExperimentId>,
}

impl VesselState {
    /// Number of onboard instruments able to run `experiment_id`.
    pub fn instrument_count(&self, experiment_id: &str) -> usize {
        self.instruments
            .iter()
            .filter(|kind| kind.as_str() == experiment_id)
            .count()
    }
}

/// Resolved (experiment, body, situation, biome) key for science lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub experiment: ExperimentId,
    pub body: BodyId,
    pub situation: Situation,
    pub biome: Option<String>,
}

impl Subject {
    /// Derive the subject for `experiment` from the vessel's current state.
    ///
    /// The biome only takes part when the experiment is biome-sensitive in
    /// the vessel's situation.
    pub fn resolve(vessel: &VesselState, experiment: &Experiment) -> Self {
        let biome = if experiment.biome_relevant(vessel.situation) {
            vessel.biome.clone()
        } else {
            None
        };
        let id = format!(
            "{}@{}{}{}",
            experiment.id(),
            vessel.body,
            vessel.situation,
            biome.as_deref().unwrap_or_default()
        );
        Self {
            id,
            experiment: experiment.id().to_string(),
            body: vessel.body.clone(),
            situation: vessel.situation,
            biome,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor state
// ────────────────────────────────────────────────────────────────────────────

/// Science values reported for a subject by the host's science model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScienceValues {
    pub collection: f32,
    pub transmission: f32,
    pub lab: f32,
}

impl ScienceValues {
    /// `true` when any value would still yield science.
    pub fn has_potential(&self) -> bool {
        self.collection > 0.0 || self.transmission > 0.0 || self.lab > 0.0
    }
}

/// Immutable per-experiment, per-tick availability snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    experiment: Arc<Experiment>,
    subject: Subject,
    collection_value: f32,
    transmission_value: f32,
    lab_value: f32,
    onboard: bool,
    available: bool,
    conditions_met: bool,
}

impl SensorState {
    /// Build a snapshot, enforcing the value invariants.
    ///
    /// # Errors
    ///
    /// [`SensorError::InvariantViolation`] when any value is negative or not a
    /// number, or when `subject` was resolved for a different experiment.
    pub fn new(
        experiment: Arc<Experiment>,
        subject: Subject,
        values: ScienceValues,
        onboard: bool,
        available: bool,
        conditions_met: bool,
    ) -> Result<Self, SensorError> {
        if subject.experiment != experiment.id() {
            return Err(SensorError::InvariantViolation(format!(
                "subject '{}' does not belong to experiment '{}'",
                subject.id,
                experiment.id()
            )));
        }
        for (field, value) in [
            ("collection_value", values.collection),
            ("transmission_value", values.transmission),
            ("lab_value", values.lab),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(SensorError::InvariantViolation(format!(
                    "{field} of {} must be >= 0, got {value}",
                    experiment.id()
                )));
            }
        }
        Ok(Self {
            experiment,
            subject,
            collection_value: values.collection,
            transmission_value: values.transmission,
            lab_value: values.lab,
            onboard,
            available,
            conditions_met,
        })
    }

    /// The conservative state used when evaluation fails: nothing met,
    /// nothing available, zero value.
    pub fn unavailable(experiment: Arc<Experiment>, subject: Subject, onboard: bool) -> Self {
        Self {
            experiment,
            subject,
            collection_value: 0.0,
            transmission_value: 0.0,
            lab_value: 0.0,
            onboard,
            available: false,
            conditions_met: false,
        }
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn collection_value(&self) -> f32 {
        self.collection_value
    }

    pub fn transmission_value(&self) -> f32 {
        self.transmission_value
    }

    pub fn lab_value(&self) -> f32 {
        self.lab_value
    }

    pub fn onboard(&self) -> bool {
        self.onboard
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn conditions_met(&self) -> bool {
        self.conditions_met
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Boundary states
// ────────────────────────────────────────────────────────────────────────────

/// Binding state of the coverage provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderState {
    /// The always-false fallback is in use.
    Unbound,
    /// An external coverage source is bound to the current reference body.
    Bound,
}

/// State shown by the alert indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorState {
    Idle,
    Alerting,
    /// Set explicitly while a vessel context is being set up or torn down.
    Busy,
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Envelope for every outbound engine event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "sensorwatch-runtime::sensor_manager"
    pub source: String,
    /// Engine tick during which the event was raised.
    pub tick: u64,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: &str, tick: u64, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.to_string(),
            tick,
            payload,
        }
    }
}

/// Outbound notifications.  All of them are edge-triggered.
#[derive(Debug, Clone, Serialize)]
pub enum EventPayload {
    AvailabilityChanged {
        experiment: ExperimentId,
        available: bool,
    },
    AnyAvailable(bool),
    CoverageProviderStateChanged(ProviderState),
    /// Raised when `onboard`, `conditions_met` or `available` flips.
    SensorStatusChanged(SensorState),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by every sensorwatch crate.
///
/// Only [`SensorError::DuplicateExperiment`] ever crosses the engine's outer
/// boundary; the other variants are absorbed, logged and turned into a
/// conservative state.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorError {
    #[error("a binding for {0} already exists")]
    DuplicateExperiment(ExperimentId),

    #[error("coverage capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("evaluation of {experiment} failed: {details}")]
    EvaluationFailed {
        experiment: ExperimentId,
        details: String,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

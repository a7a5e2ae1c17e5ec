//! Scenario files – a scripted host for the `sensorwatch` binary.
//!
//! A scenario is a TOML document with:
//!
//! - `[[experiments]]` – the experiment catalog,
//! - `[science]` – values per experiment and the subjects already exhausted,
//! - `[scansat]` – an optional simulated SCANsat plugin (loaded from a given
//!   frame on, with biome coverage regions per body),
//! - `[[frames]]` – the host state frame by frame (`repeat` stretches a frame
//!   over several host ticks).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use sensorwatch_coverage::{
    CoverageContract, CoverageKind, DynObject, DynType, HostMethod, HostValue, LoadedModule,
    ModuleRegistry,
};
use sensorwatch_kernel::ScienceModel;
use sensorwatch_runtime::Host;
use sensorwatch_types::{
    ExperimentId, Experiment, ScienceValues, SensorError, Subject, VesselState,
};
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// File model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub science: ScienceTable,
    #[serde(default)]
    pub scansat: Option<ScanSatSim>,
    pub frames: Vec<FrameSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScienceTable {
    /// Collection value of experiments without an entry in `values`.
    #[serde(default = "default_value")]
    pub default_value: f32,
    #[serde(default)]
    pub values: HashMap<ExperimentId, f32>,
    /// Transmission value as a fraction of the collection value.
    #[serde(default = "default_transmit_ratio")]
    pub transmit_ratio: f32,
    /// Subject ids whose science was already collected.
    #[serde(default)]
    pub exhausted: HashSet<String>,
}

fn default_value() -> f32 {
    5.0
}

fn default_transmit_ratio() -> f32 {
    0.5
}

impl Default for ScienceTable {
    fn default() -> Self {
        Self {
            default_value: default_value(),
            values: HashMap::new(),
            transmit_ratio: default_transmit_ratio(),
            exhausted: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanSatSim {
    /// First frame (1-based) at which the plugin module is loaded.
    #[serde(default)]
    pub loaded_at_frame: u64,
    #[serde(default)]
    pub regions: Vec<Region>,
}

/// A latitude/longitude box whose biomes are known.
#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub body: String,
    #[serde(default = "min_lat")]
    pub min_lat: f64,
    #[serde(default = "max_lat")]
    pub max_lat: f64,
    #[serde(default = "min_lon")]
    pub min_lon: f64,
    #[serde(default = "max_lon")]
    pub max_lon: f64,
}

fn min_lat() -> f64 {
    -90.0
}
fn max_lat() -> f64 {
    90.0
}
fn min_lon() -> f64 {
    -180.0
}
fn max_lon() -> f64 {
    180.0
}

impl Region {
    fn contains(&self, body: &str, lat: f64, lon: f64) -> bool {
        self.body == body
            && (self.min_lat..=self.max_lat).contains(&lat)
            && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameSpec {
    #[serde(default = "one")]
    pub repeat: u32,
    #[serde(default = "yes")]
    pub science_ready: bool,
    /// `None` means no active vessel.
    #[serde(default)]
    pub vessel: Option<VesselState>,
    /// Switch the coverage source when this frame starts.
    #[serde(default)]
    pub coverage: Option<CoverageKind>,
}

fn one() -> u32 {
    1
}
fn yes() -> bool {
    true
}

/// One host tick of the expanded timeline.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    /// 1-based host frame number.
    pub frame: u64,
    pub spec: &'a FrameSpec,
    /// `true` on the first repetition of `spec`.
    pub first: bool,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read scenario at {}: {}", path.display(), e))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let scenario: Scenario =
            toml::from_str(raw).map_err(|e| format!("Failed to parse scenario: {}", e))?;
        if scenario.frames.is_empty() {
            return Err("Scenario has no frames".to_string());
        }
        Ok(scenario)
    }

    /// Every host tick, in order.
    pub fn timeline(&self) -> impl Iterator<Item = Step<'_>> {
        self.frames
            .iter()
            .flat_map(|spec| (0..spec.repeat).map(move |i| (spec, i == 0)))
            .enumerate()
            .map(|(i, (spec, first))| Step {
                frame: i as u64 + 1,
                spec,
                first,
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulated host
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimScience {
    table: ScienceTable,
}

impl ScienceModel for SimScience {
    fn values(&self, experiment: &Experiment, _subject: &Subject) -> Result<ScienceValues, SensorError> {
        let value = self
            .table
            .values
            .get(experiment.id())
            .copied()
            .unwrap_or(self.table.default_value);
        Ok(ScienceValues {
            collection: value,
            transmission: value * self.table.transmit_ratio,
            lab: 0.0,
        })
    }

    fn exhausted(&self, _experiment: &Experiment, subject: &Subject) -> Result<bool, SensorError> {
        Ok(self.table.exhausted.contains(&subject.id))
    }
}

/// Host whose state is replayed from a [`Scenario`].
pub struct SimHost {
    science_ready: bool,
    vessel: Option<VesselState>,
    science: SimScience,
    modules: ModuleRegistry,
    scansat: Option<ScanSatSim>,
}

impl SimHost {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            science_ready: false,
            vessel: None,
            science: SimScience {
                table: scenario.science.clone(),
            },
            modules: ModuleRegistry::new(),
            scansat: scenario.scansat.clone(),
        }
    }

    /// Move the host to `step`.
    pub fn apply(&mut self, step: &Step<'_>) {
        self.science_ready = step.spec.science_ready;
        self.vessel = step.spec.vessel.clone();

        if let Some(sim) = self
            .scansat
            .take_if(|sim| step.frame >= sim.loaded_at_frame)
        {
            info!(frame = step.frame, regions = sim.regions.len(), "simulated SCANsat module loaded");
            self.modules.load(scansat_module(Arc::new(sim.regions)));
        }
    }
}

impl Host for SimHost {
    fn science_ready(&self) -> bool {
        self.science_ready
    }

    fn active_vessel(&self) -> Option<VesselState> {
        self.vessel.clone()
    }

    fn science(&self) -> &dyn ScienceModel {
        &self.science
    }

    fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }
}

/// A module shaped like SCANsat: `SCANcontroller.controller.getData(body)`
/// returns a data object whose `isCovered(lon, lat, mask)` answers from
/// `regions`.  Bodies without any region have no data object.
fn scansat_module(regions: Arc<Vec<Region>>) -> LoadedModule {
    let contract = CoverageContract::SCANSAT_V1;

    let per_body = regions.clone();
    let get_data = HostMethod::new(
        contract.data_method,
        CoverageContract::data_signature(),
        move |args| {
            let Some(HostValue::Body(body)) = args.first() else {
                return Ok(HostValue::Unit);
            };
            if !per_body.iter().any(|r| &r.body == body) {
                return Ok(HostValue::Unit);
            }
            let regions = per_body.clone();
            let body = body.clone();
            let is_covered = HostMethod::new(
                contract.coverage_method,
                CoverageContract::coverage_signature(),
                move |args| {
                    let lon = args.first().and_then(HostValue::as_float).unwrap_or(f64::NAN);
                    let lat = args.get(1).and_then(HostValue::as_float).unwrap_or(f64::NAN);
                    Ok(HostValue::Bool(
                        regions.iter().any(|r| r.contains(&body, lat, lon)),
                    ))
                },
            );
            Ok(HostValue::Object(Arc::new(
                DynObject::new("SCANsat.SCANdata").with_method(is_covered),
            )))
        },
    );

    let controller = Arc::new(DynObject::new(contract.type_name).with_method(get_data));
    let ty = DynType::new(contract.type_name)
        .with_property(contract.accessor, move || Ok(HostValue::Object(controller.clone())));
    LoadedModule::new("SCANsat").with_type(Arc::new(ty))
}

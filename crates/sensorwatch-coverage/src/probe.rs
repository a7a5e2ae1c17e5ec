//! [`CapabilityProbe`] – structural discovery of an optional coverage plugin.
//!
//! Discovery runs in two steps:
//!
//! 1. [`CapabilityProbe::probe`] scans the [`ModuleRegistry`] for the
//!    contract's type name.  Absence is a normal outcome and yields
//!    [`ProviderHandle::None`].
//! 2. [`CapabilityProbe::bind`] walks the contract from that type: the static
//!    accessor, the per-body data method, and finally the coverage method,
//!    validating every signature before returning a [`BoundCoverage`].
//!
//! Nothing here panics or invokes a member whose shape has not been checked.

use std::fmt;
use std::sync::Arc;

use sensorwatch_types::SensorError;
use thiserror::Error;
use tracing::debug;

use crate::host::{HostError, HostType, HostValue, MethodSignature, ModuleRegistry, ValueKind};
use crate::provider::BoundCoverage;

// ────────────────────────────────────────────────────────────────────────────
// Contract
// ────────────────────────────────────────────────────────────────────────────

/// Versioned description of the API shape a coverage plugin must expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageContract {
    /// Fully-qualified name of the controller type.
    pub type_name: &'static str,
    /// Static property on the controller type returning the controller.
    pub accessor: &'static str,
    /// Controller method returning the per-body data object.
    pub data_method: &'static str,
    /// Data-object method answering `(lon, lat, mask) -> bool`.
    pub coverage_method: &'static str,
    /// Mask selecting biome coverage.
    pub biome_mask: i32,
}

impl CoverageContract {
    /// The SCANsat controller shape.
    pub const SCANSAT_V1: CoverageContract = CoverageContract {
        type_name: "SCANsat.SCANcontroller",
        accessor: "controller",
        data_method: "getData",
        coverage_method: "isCovered",
        biome_mask: 8,
    };

    /// `getData(body) -> object`
    pub fn data_signature() -> MethodSignature {
        MethodSignature::new([ValueKind::Body], ValueKind::Object)
    }

    /// `isCovered(lon, lat, mask) -> bool`
    pub fn coverage_signature() -> MethodSignature {
        MethodSignature::new(
            [ValueKind::Float, ValueKind::Float, ValueKind::Int],
            ValueKind::Bool,
        )
    }
}

impl Default for CoverageContract {
    fn default() -> Self {
        Self::SCANSAT_V1
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle & errors
// ────────────────────────────────────────────────────────────────────────────

/// Result of a probe: either nothing, or the located controller type.
#[derive(Clone)]
pub enum ProviderHandle {
    None,
    Found(Arc<dyn HostType>),
}

impl ProviderHandle {
    pub fn is_found(&self) -> bool {
        matches!(self, ProviderHandle::Found(_))
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderHandle::None => f.write_str("None"),
            ProviderHandle::Found(ty) => write!(f, "Found({})", ty.full_name()),
        }
    }
}

/// Why a coverage source could not be bound.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("type {0} is not loaded")]
    TypeMissing(String),

    #[error("static accessor {type_name}.{accessor} not found")]
    AccessorMissing {
        type_name: String,
        accessor: String,
    },

    #[error("static accessor {accessor} failed: {source}")]
    AccessorFailed {
        accessor: String,
        #[source]
        source: HostError,
    },

    #[error("{0} did not return an object")]
    NotAnObject(String),

    #[error("method {method} not found on {type_name}")]
    MethodMissing { type_name: String, method: String },

    #[error("method {method} has signature {found}, expected {expected}")]
    SignatureMismatch {
        method: String,
        expected: MethodSignature,
        found: MethodSignature,
    },

    #[error("no coverage data for body {body}: {details}")]
    DataUnavailable { body: String, details: String },
}

impl From<BindError> for SensorError {
    fn from(e: BindError) -> Self {
        SensorError::CapabilityUnavailable(e.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Probe
// ────────────────────────────────────────────────────────────────────────────

/// Locates and binds a coverage source described by a [`CoverageContract`].
///
/// # Example
///
/// ```
/// use sensorwatch_coverage::{CapabilityProbe, ModuleRegistry};
///
/// let probe = CapabilityProbe::default();
/// let handle = probe.probe(&ModuleRegistry::new());
/// assert!(!handle.is_found());
/// assert!(probe.bind(&handle, "Kerbin").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CapabilityProbe {
    contract: CoverageContract,
}

impl CapabilityProbe {
    pub fn new(contract: CoverageContract) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> &CoverageContract {
        &self.contract
    }

    /// Scan `registry` for the contract type.
    ///
    /// Exactly one match is required; zero matches is the normal "plugin not
    /// installed" case, more than one is treated as an unusable shape.
    pub fn probe(&self, registry: &ModuleRegistry) -> ProviderHandle {
        let mut found = registry.find_types(self.contract.type_name);
        match found.len() {
            0 => {
                debug!(type_name = self.contract.type_name, "coverage plugin not loaded");
                ProviderHandle::None
            }
            1 => ProviderHandle::Found(found.remove(0)),
            n => {
                debug!(
                    type_name = self.contract.type_name,
                    count = n,
                    "coverage plugin type is ambiguous; ignoring it"
                );
                ProviderHandle::None
            }
        }
    }

    /// Bind the located type to `body`, validating the whole contract.
    pub fn bind(&self, handle: &ProviderHandle, body: &str) -> Result<BoundCoverage, BindError> {
        let c = &self.contract;
        let ty = match handle {
            ProviderHandle::Found(ty) => ty,
            ProviderHandle::None => return Err(BindError::TypeMissing(c.type_name.to_string())),
        };

        let controller = ty
            .static_property(c.accessor)
            .ok_or_else(|| BindError::AccessorMissing {
                type_name: c.type_name.to_string(),
                accessor: c.accessor.to_string(),
            })?
            .map_err(|source| BindError::AccessorFailed {
                accessor: c.accessor.to_string(),
                source,
            })?
            .into_object()
            .ok_or_else(|| BindError::NotAnObject(format!("{}.{}", c.type_name, c.accessor)))?;

        let get_data = controller
            .method(c.data_method)
            .ok_or_else(|| BindError::MethodMissing {
                type_name: controller.type_name().to_string(),
                method: c.data_method.to_string(),
            })?;
        check_signature(c.data_method, &CoverageContract::data_signature(), get_data.signature())?;

        let data = get_data
            .invoke(&[HostValue::Body(body.to_string())])
            .map_err(|e| BindError::DataUnavailable {
                body: body.to_string(),
                details: e.to_string(),
            })?
            .into_object()
            .ok_or_else(|| BindError::DataUnavailable {
                body: body.to_string(),
                details: format!("{} returned no object", c.data_method),
            })?;

        let is_covered = data
            .method(c.coverage_method)
            .ok_or_else(|| BindError::MethodMissing {
                type_name: data.type_name().to_string(),
                method: c.coverage_method.to_string(),
            })?;
        check_signature(
            c.coverage_method,
            &CoverageContract::coverage_signature(),
            is_covered.signature(),
        )?;

        debug!(body, type_name = c.type_name, "coverage source bound");
        Ok(BoundCoverage::new(body.to_string(), is_covered, c.biome_mask))
    }
}

fn check_signature(
    method: &str,
    expected: &MethodSignature,
    found: &MethodSignature,
) -> Result<(), BindError> {
    if expected == found {
        Ok(())
    } else {
        Err(BindError::SignatureMismatch {
            method: method.to_string(),
            expected: expected.clone(),
            found: found.clone(),
        })
    }
}

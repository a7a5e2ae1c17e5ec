//! [`CoverageProvider`] – answers whether a location is already known.

use std::cell::Cell;

use sensorwatch_types::BodyId;
use tracing::warn;

use crate::host::{HostMethod, HostValue};

/// Answers "is the biome at this location already known to the player".
///
/// Implementations never fail: any internal problem is reported as `false`.
pub trait CoverageProvider {
    fn have_coverage(&self, latitude: f64, longitude: f64) -> bool;
}

/// The static fallback provider.  Knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCoverage;

impl CoverageProvider for NoCoverage {
    fn have_coverage(&self, _latitude: f64, _longitude: f64) -> bool {
        false
    }
}

/// A provider bound to an external coverage source for one reference body.
///
/// Wraps the validated coverage method as a cached callable.  The first
/// invocation failure latches the provider into a faulted state; from then on
/// it answers `false` without calling out, and the owning
/// [`CoverageBinding`][crate::binding::CoverageBinding] falls back to
/// [`NoCoverage`] at the end of the current pass.
#[derive(Debug)]
pub struct BoundCoverage {
    body: BodyId,
    coverage: HostMethod,
    mask: i32,
    faulted: Cell<bool>,
}

impl BoundCoverage {
    pub(crate) fn new(body: BodyId, coverage: HostMethod, mask: i32) -> Self {
        Self {
            body,
            coverage,
            mask,
            faulted: Cell::new(false),
        }
    }

    /// The reference body this binding answers for.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// `true` once an invocation has failed.
    pub fn is_faulted(&self) -> bool {
        self.faulted.get()
    }
}

impl CoverageProvider for BoundCoverage {
    fn have_coverage(&self, latitude: f64, longitude: f64) -> bool {
        if self.faulted.get() {
            return false;
        }
        // The external contract takes longitude first.
        let args = [
            HostValue::Float(longitude),
            HostValue::Float(latitude),
            HostValue::Int(self.mask),
        ];
        match self.coverage.invoke(&args) {
            Ok(value) => value.as_bool().unwrap_or_else(|| {
                warn!(
                    body = %self.body,
                    returned = ?value,
                    "coverage query returned a non-boolean value"
                );
                self.faulted.set(true);
                false
            }),
            Err(e) => {
                warn!(body = %self.body, error = %e, "coverage query failed");
                self.faulted.set(true);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostError, MethodSignature, ValueKind};

    fn coverage_signature() -> MethodSignature {
        MethodSignature::new(
            [ValueKind::Float, ValueKind::Float, ValueKind::Int],
            ValueKind::Bool,
        )
    }

    #[test]
    fn no_coverage_is_always_false() {
        let p = NoCoverage;
        assert!(!p.have_coverage(0.0, 0.0));
        assert!(!p.have_coverage(-45.0, 120.0));
    }

    #[test]
    fn bound_coverage_passes_longitude_first() {
        // Known only where lon > 0 and lat < 0.
        let m = HostMethod::new("isCovered", coverage_signature(), |args| {
            let lon = args[0].as_float().unwrap_or_default();
            let lat = args[1].as_float().unwrap_or_default();
            Ok(HostValue::Bool(lon > 0.0 && lat < 0.0))
        });
        let p = BoundCoverage::new("Mun".into(), m, 8);
        assert!(p.have_coverage(-10.0, 10.0));
        assert!(!p.have_coverage(10.0, -10.0));
        assert!(!p.is_faulted());
    }

    #[test]
    fn invocation_failure_latches_false() {
        let m = HostMethod::new("isCovered", coverage_signature(), |_| {
            Err(HostError::Invocation {
                method: "isCovered".into(),
                details: "null reference".into(),
            })
        });
        let p = BoundCoverage::new("Mun".into(), m, 8);
        assert!(!p.have_coverage(1.0, 1.0));
        assert!(p.is_faulted());
        assert!(!p.have_coverage(1.0, 1.0));
    }

    #[test]
    fn non_boolean_result_faults() {
        let m = HostMethod::new("isCovered", coverage_signature(), |_| Ok(HostValue::Int(1)));
        let p = BoundCoverage::new("Mun".into(), m, 8);
        assert!(!p.have_coverage(1.0, 1.0));
        assert!(p.is_faulted());
    }
}

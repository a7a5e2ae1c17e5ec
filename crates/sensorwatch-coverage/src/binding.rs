//! [`CoverageBinding`] – the `Unbound ⇄ Bound` state machine.
//!
//! The binding owns whichever [`CoverageProvider`] is active and is the only
//! place where it is swapped.  Rebinds are attempted once per reference-body
//! change.  While an evaluation pass is open (between
//! [`begin_pass`](CoverageBinding::begin_pass) and
//! [`end_pass`](CoverageBinding::end_pass)) rebind requests are queued, so
//! every experiment evaluated in one tick sees the same provider.
//!
//! Methods that may change the state return the list of [`ProviderState`]
//! transitions they caused, in order, for the caller to publish.

use serde::{Deserialize, Serialize};
use sensorwatch_types::{BodyId, ProviderState};
use tracing::{info, warn};

use crate::host::ModuleRegistry;
use crate::probe::CapabilityProbe;
use crate::provider::{BoundCoverage, CoverageProvider, NoCoverage};

/// Which coverage source the user selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageKind {
    /// Always use the fallback provider.
    #[default]
    None,
    /// Bind to the SCANsat plugin when present.
    ScanSat,
}

impl std::fmt::Display for CoverageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverageKind::None => write!(f, "none"),
            CoverageKind::ScanSat => write!(f, "scansat"),
        }
    }
}

enum Active {
    Fallback(NoCoverage),
    Bound(BoundCoverage),
}

/// Owns the active coverage provider for one vessel context.
///
/// # Example
///
/// ```
/// use sensorwatch_coverage::{CoverageBinding, CoverageKind, ModuleRegistry};
/// use sensorwatch_types::ProviderState;
///
/// let registry = ModuleRegistry::new();
/// let mut binding = CoverageBinding::new(CoverageKind::ScanSat);
///
/// // No plugin loaded: the attempt fails quietly and the fallback stays.
/// binding.on_body_changed(&registry, "Kerbin");
/// assert_eq!(binding.state(), ProviderState::Unbound);
/// assert!(!binding.provider().have_coverage(0.0, 0.0));
/// ```
pub struct CoverageBinding {
    kind: CoverageKind,
    probe: CapabilityProbe,
    active: Active,
    body: Option<BodyId>,
    in_pass: bool,
    pending: Option<BodyId>,
    attempts: u64,
    failures: u64,
}

impl CoverageBinding {
    /// Create an unbound binding using the default contract.
    pub fn new(kind: CoverageKind) -> Self {
        Self::with_probe(kind, CapabilityProbe::default())
    }

    pub fn with_probe(kind: CoverageKind, probe: CapabilityProbe) -> Self {
        Self {
            kind,
            probe,
            active: Active::Fallback(NoCoverage),
            body: None,
            in_pass: false,
            pending: None,
            attempts: 0,
            failures: 0,
        }
    }

    pub fn kind(&self) -> CoverageKind {
        self.kind
    }

    pub fn state(&self) -> ProviderState {
        match self.active {
            Active::Fallback(_) => ProviderState::Unbound,
            Active::Bound(_) => ProviderState::Bound,
        }
    }

    /// The reference body of the last rebind request that was applied.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Number of bind attempts made so far.
    pub fn bind_attempts(&self) -> u64 {
        self.attempts
    }

    /// Number of bind attempts that ended in the fallback.
    pub fn bind_failures(&self) -> u64 {
        self.failures
    }

    /// `true` while a rebind is queued behind an open pass.
    pub fn has_pending_rebind(&self) -> bool {
        self.pending.is_some()
    }

    /// The active provider.  Always present.
    pub fn provider(&self) -> &dyn CoverageProvider {
        match &self.active {
            Active::Fallback(none) => none,
            Active::Bound(bound) => bound,
        }
    }

    /// React to a reference-body change.
    ///
    /// Rebinds immediately, or queues the rebind when a pass is open.  A
    /// later request for a different body replaces a queued one.
    pub fn on_body_changed(&mut self, registry: &ModuleRegistry, body: &str) -> Vec<ProviderState> {
        if self.in_pass {
            self.pending = Some(body.to_string());
            return Vec::new();
        }
        self.rebind(registry, body)
    }

    /// Switch the selected coverage source and rebind to the current body.
    pub fn set_kind(&mut self, registry: &ModuleRegistry, kind: CoverageKind) -> Vec<ProviderState> {
        if kind == self.kind {
            return Vec::new();
        }
        info!(from = %self.kind, to = %kind, "coverage provider kind changed");
        self.kind = kind;
        match self.body.clone() {
            Some(body) => self.on_body_changed(registry, &body),
            None => Vec::new(),
        }
    }

    /// Open an evaluation pass.  Rebinds requested until
    /// [`end_pass`](Self::end_pass) are deferred.
    pub fn begin_pass(&mut self) {
        self.in_pass = true;
    }

    /// Close the evaluation pass.
    ///
    /// Drops a provider that faulted during the pass in favour of the
    /// fallback, then applies any queued rebind.
    pub fn end_pass(&mut self, registry: &ModuleRegistry) -> Vec<ProviderState> {
        self.in_pass = false;
        let mut transitions = Vec::new();

        if let Active::Bound(bound) = &self.active
            && bound.is_faulted()
        {
            warn!(
                body = %bound.body(),
                "coverage provider faulted; falling back to none provider"
            );
            self.active = Active::Fallback(NoCoverage);
            transitions.push(ProviderState::Unbound);
        }

        if let Some(body) = self.pending.take() {
            transitions.extend(self.rebind(registry, &body));
        }
        transitions
    }

    fn rebind(&mut self, registry: &ModuleRegistry, body: &str) -> Vec<ProviderState> {
        let before = self.state();
        self.body = Some(body.to_string());

        self.active = match self.kind {
            CoverageKind::None => Active::Fallback(NoCoverage),
            CoverageKind::ScanSat => {
                self.attempts += 1;
                let handle = self.probe.probe(registry);
                match self.probe.bind(&handle, body) {
                    Ok(bound) => {
                        info!(body, "coverage provider bound");
                        Active::Bound(bound)
                    }
                    Err(e) => {
                        self.failures += 1;
                        warn!(
                            body,
                            error = %e,
                            "coverage capability unavailable; using none provider"
                        );
                        Active::Fallback(NoCoverage)
                    }
                }
            }
        };

        let after = self.state();
        if after != before { vec![after] } else { Vec::new() }
    }
}

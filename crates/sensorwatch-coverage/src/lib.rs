//! `sensorwatch-coverage` – Optional Coverage Knowledge
//!
//! Answers "is the biome at this location already known" without any
//! compile-time dependency on the plugin that may know it.
//!
//! # Modules
//!
//! - [`host`] – [`ModuleRegistry`][host::ModuleRegistry]: the structural view
//!   of the host's loaded modules (types, static accessors, objects, methods
//!   with declared signatures).
//! - [`provider`] – [`CoverageProvider`][provider::CoverageProvider]: the
//!   uniform, infallible query surface, with the always-false
//!   [`NoCoverage`][provider::NoCoverage] and the plugin-backed
//!   [`BoundCoverage`][provider::BoundCoverage].
//! - [`probe`] – [`CapabilityProbe`][probe::CapabilityProbe]: locates the
//!   plugin type and validates the [`CoverageContract`][probe::CoverageContract]
//!   shape before producing a bound provider.
//! - [`binding`] – [`CoverageBinding`][binding::CoverageBinding]: the
//!   `Unbound ⇄ Bound` state machine, rebinding on reference-body changes and
//!   deferring rebinds requested during an evaluation pass.

pub mod binding;
pub mod host;
pub mod probe;
pub mod provider;

pub use binding::{CoverageBinding, CoverageKind};
pub use host::{
    DynObject, DynType, HostError, HostMethod, HostObject, HostType, HostValue, LoadedModule,
    MethodSignature, ModuleRegistry, ValueKind,
};
pub use probe::{BindError, CapabilityProbe, CoverageContract, ProviderHandle};
pub use provider::{BoundCoverage, CoverageProvider, NoCoverage};

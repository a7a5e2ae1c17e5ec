//! Host module registry – the structural view of what the host process has
//! loaded.
//!
//! Optional collaborators are never linked against.  Instead the host exposes
//! its loaded modules as a [`ModuleRegistry`] of named [`HostType`]s; a type
//! can hand out static properties, and the [`HostObject`]s those return can
//! hand out [`HostMethod`]s with a declared [`MethodSignature`].  The
//! [`CapabilityProbe`][crate::probe::CapabilityProbe] walks this structure to
//! find and validate an API shape before anything is invoked.
//!
//! [`DynType`] and [`DynObject`] are closure-backed implementations for hosts
//! (and tests) that assemble their registry at runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sensorwatch_types::BodyId;
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Dynamic values
// ────────────────────────────────────────────────────────────────────────────

/// Kind tag of a [`HostValue`], used in method signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Unit,
    Bool,
    Int,
    Float,
    Body,
    Object,
}

/// A value crossing the host boundary.
#[derive(Clone)]
pub enum HostValue {
    Unit,
    Bool(bool),
    Int(i32),
    Float(f64),
    Body(BodyId),
    Object(Arc<dyn HostObject>),
}

impl HostValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            HostValue::Unit => ValueKind::Unit,
            HostValue::Bool(_) => ValueKind::Bool,
            HostValue::Int(_) => ValueKind::Int,
            HostValue::Float(_) => ValueKind::Float,
            HostValue::Body(_) => ValueKind::Body,
            HostValue::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<Arc<dyn HostObject>> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Unit => f.write_str("Unit"),
            HostValue::Bool(b) => write!(f, "Bool({b})"),
            HostValue::Int(i) => write!(f, "Int({i})"),
            HostValue::Float(v) => write!(f, "Float({v})"),
            HostValue::Body(b) => write!(f, "Body({b})"),
            HostValue::Object(obj) => write!(f, "Object({})", obj.type_name()),
        }
    }
}

/// Errors raised by the host while resolving or invoking a member.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("invocation of {method} failed: {details}")]
    Invocation { method: String, details: String },

    #[error("{method} expects {expected:?}, got {found:?}")]
    ArgumentMismatch {
        method: String,
        expected: Vec<ValueKind>,
        found: Vec<ValueKind>,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Methods
// ────────────────────────────────────────────────────────────────────────────

/// Parameter and return kinds of a host method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: Vec<ValueKind>,
    pub returns: ValueKind,
}

impl MethodSignature {
    pub fn new(params: impl Into<Vec<ValueKind>>, returns: ValueKind) -> Self {
        Self {
            params: params.into(),
            returns,
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.params, self.returns)
    }
}

type MethodFn = Arc<dyn Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync>;

/// A resolved, callable host member.  Cloning is cheap.
#[derive(Clone)]
pub struct HostMethod {
    name: String,
    signature: MethodSignature,
    call: MethodFn,
}

impl HostMethod {
    pub fn new<F>(name: impl Into<String>, signature: MethodSignature, call: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            call: Arc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Invoke the method after checking argument kinds against the declared
    /// signature.
    pub fn invoke(&self, args: &[HostValue]) -> Result<HostValue, HostError> {
        let found: Vec<ValueKind> = args.iter().map(HostValue::kind).collect();
        if found != self.signature.params {
            return Err(HostError::ArgumentMismatch {
                method: self.name.clone(),
                expected: self.signature.params.clone(),
                found,
            });
        }
        (self.call)(args)
    }
}

impl fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMethod")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Types & objects
// ────────────────────────────────────────────────────────────────────────────

/// An object instance living in the host.
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &str;

    /// Resolve a public instance method by name.
    fn method(&self, name: &str) -> Option<HostMethod>;
}

/// A type exported by a loaded host module.
pub trait HostType: Send + Sync {
    /// Fully-qualified name, e.g. `"SCANsat.SCANcontroller"`.
    fn full_name(&self) -> &str;

    /// Read a public static property.  `None` when the property does not
    /// exist; `Some(Err(_))` when reading it failed.
    fn static_property(&self, name: &str) -> Option<Result<HostValue, HostError>>;
}

/// One loaded module and the types it exports.
#[derive(Clone)]
pub struct LoadedModule {
    pub name: String,
    pub types: Vec<Arc<dyn HostType>>,
}

impl LoadedModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, ty: Arc<dyn HostType>) -> Self {
        self.types.push(ty);
        self
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.types.iter().map(|t| t.full_name()).collect();
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("types", &names)
            .finish()
    }
}

/// The host's loaded-module registry.
///
/// Construct with [`ModuleRegistry::new`], [`load`](ModuleRegistry::load)
/// modules, then look types up by their fully-qualified name.
#[derive(Default, Clone, Debug)]
pub struct ModuleRegistry {
    modules: Vec<LoadedModule>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loaded module.  A previously loaded module with the same
    /// name is replaced.
    pub fn load(&mut self, module: LoadedModule) {
        self.modules.retain(|m| m.name != module.name);
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    /// Every exported type whose full name equals `full_name`, across all
    /// modules, in load order.
    pub fn find_types(&self, full_name: &str) -> Vec<Arc<dyn HostType>> {
        self.modules
            .iter()
            .flat_map(|m| m.types.iter())
            .filter(|t| t.full_name() == full_name)
            .cloned()
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Closure-backed implementations
// ────────────────────────────────────────────────────────────────────────────

type PropertyFn = Arc<dyn Fn() -> Result<HostValue, HostError> + Send + Sync>;

/// A [`HostType`] whose static properties are closures.
pub struct DynType {
    full_name: String,
    properties: HashMap<String, PropertyFn>,
}

impl DynType {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property<F>(mut self, name: impl Into<String>, read: F) -> Self
    where
        F: Fn() -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        self.properties.insert(name.into(), Arc::new(read));
        self
    }
}

impl HostType for DynType {
    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn static_property(&self, name: &str) -> Option<Result<HostValue, HostError>> {
        self.properties.get(name).map(|read| read())
    }
}

/// A [`HostObject`] assembled from a set of [`HostMethod`]s.
pub struct DynObject {
    type_name: String,
    methods: HashMap<String, HostMethod>,
}

impl DynObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn with_method(mut self, method: HostMethod) -> Self {
        self.methods.insert(method.name().to_string(), method);
        self
    }
}

impl HostObject for DynObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn method(&self, name: &str) -> Option<HostMethod> {
        self.methods.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_method() -> HostMethod {
        HostMethod::new(
            "echo",
            MethodSignature::new([ValueKind::Int], ValueKind::Int),
            |args| Ok(args[0].clone()),
        )
    }

    #[test]
    fn invoke_checks_argument_kinds() {
        let m = echo_method();
        assert!(matches!(m.invoke(&[HostValue::Int(4)]), Ok(HostValue::Int(4))));
        let err = m.invoke(&[HostValue::Float(4.0)]).unwrap_err();
        assert!(matches!(err, HostError::ArgumentMismatch { .. }));
    }

    #[test]
    fn invoke_checks_arity() {
        let m = echo_method();
        assert!(m.invoke(&[]).is_err());
        assert!(m.invoke(&[HostValue::Int(1), HostValue::Int(2)]).is_err());
    }

    #[test]
    fn registry_finds_types_across_modules() {
        let mut reg = ModuleRegistry::new();
        reg.load(LoadedModule::new("a").with_type(Arc::new(DynType::new("A.Thing"))));
        reg.load(LoadedModule::new("b").with_type(Arc::new(DynType::new("A.Thing"))));
        reg.load(LoadedModule::new("c").with_type(Arc::new(DynType::new("C.Other"))));

        assert_eq!(reg.find_types("A.Thing").len(), 2);
        assert_eq!(reg.find_types("C.Other").len(), 1);
        assert!(reg.find_types("Missing").is_empty());
    }

    #[test]
    fn reloading_module_replaces_it() {
        let mut reg = ModuleRegistry::new();
        reg.load(LoadedModule::new("a").with_type(Arc::new(DynType::new("A.One"))));
        reg.load(LoadedModule::new("a").with_type(Arc::new(DynType::new("A.Two"))));
        assert_eq!(reg.modules().len(), 1);
        assert!(reg.find_types("A.One").is_empty());
        assert_eq!(reg.find_types("A.Two").len(), 1);
    }

    #[test]
    fn dyn_type_properties() {
        let ty = DynType::new("T").with_property("answer", || Ok(HostValue::Int(42)));
        assert!(matches!(ty.static_property("answer"), Some(Ok(HostValue::Int(42)))));
        assert!(ty.static_property("missing").is_none());
    }

    #[test]
    fn dyn_object_methods() {
        let obj = DynObject::new("Obj").with_method(echo_method());
        assert_eq!(obj.type_name(), "Obj");
        assert!(obj.method("echo").is_some());
        assert!(obj.method("nope").is_none());
    }
}

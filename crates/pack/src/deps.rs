//! # Context Dependencies
//!
//! A context dependency is a tagged predicate over the runtime environment,
//! attached to a slot when it is written and evaluated again before the slot
//! is reconstructed. Dependencies are serialized into the manifest as
//! `{"type": <tag>, ...parameters}` objects and rebuilt through a
//! process-wide registry mapping each type tag to a constructor.
//!
//! The registry is seeded with the built-in [`module_version`] variant and
//! extended through [`register_dependency_type`]. Registration happens at
//! program start; operations only ever read the registry.


pub mod module_version;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;

/// The reserved key carrying the dependency type tag on the wire.
pub const TYPE_KEY: &str = "type";

/// Errors raised while constructing or reconstructing context dependencies.
#[derive(Error, Debug)]
pub enum DependencyError {
    /// The serialized form was not a JSON object.
    #[error("context dependency is not a JSON object")]
    NotAnObject,
    /// The serialized form carries no `type` tag.
    #[error("context dependency does not declare a `type`")]
    MissingType,
    /// No constructor is registered for the given type tag.
    #[error("unknown context dependency type `{0}`")]
    UnknownType(String),
    /// The parameters did not match what the concrete type expects. Unknown
    /// parameter keys are fatal.
    #[error("malformed `{tag}` dependency parameters: {source}")]
    BadParams {
        /// The type tag whose constructor rejected the parameters.
        tag: &'static str,
        /// The underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },
    /// A module version dependency was given an empty module name.
    #[error("a module version dependency needs a non-empty module name")]
    EmptyModuleName,
    /// Catch-all for constructors registered outside this crate.
    #[error("{0}")]
    Invalid(String),
}

/// A predicate over the runtime environment gating slot reconstruction.
///
/// Implementations must produce a stable [`id`](ContextDependency::id):
/// reconstructing a dependency from its serialized parameters must yield the
/// same id the manifest used to reference it.
pub trait ContextDependency: fmt::Debug + Send + Sync {
    /// The registry tag identifying this dependency type.
    fn type_tag(&self) -> &'static str;

    /// Stable identifier for this dependency instance. Two dependencies with
    /// equal parameters share an id and are interchangeable.
    fn id(&self) -> String;

    /// Evaluate the predicate against the current execution context.
    fn is_satisfied(&self) -> bool;

    /// The dependency parameters as JSON scalars, without the type tag.
    fn params(&self) -> Map<String, Value>;
}

/// Constructor signature stored in the registry. Receives the serialized
/// parameters with the `type` key already stripped.
pub type DependencyCtor =
    fn(&Map<String, Value>) -> Result<Arc<dyn ContextDependency>, DependencyError>;

static REGISTRY: LazyLock<RwLock<HashMap<&'static str, DependencyCtor>>> = LazyLock::new(|| {
    let mut types: HashMap<&'static str, DependencyCtor> = HashMap::new();
    types.insert(
        module_version::ModuleVersion::TYPE,
        module_version::ModuleVersion::from_params,
    );
    RwLock::new(types)
});

/// Register a constructor for a new dependency type.
///
/// Re-registering a tag replaces the previous constructor.
pub fn register_dependency_type(tag: &'static str, ctor: DependencyCtor) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(tag, ctor);
    tracing::debug!(tag, "registered context dependency type");
}

/// Reconstruct a dependency from its serialized `{"type": …}` form.
///
/// # Errors
///
/// Fails when the value is not an object, declares no or an unknown type
/// tag, or when the registered constructor rejects the parameters.
pub fn from_value(value: &Value) -> Result<Arc<dyn ContextDependency>, DependencyError> {
    let object = value.as_object().ok_or(DependencyError::NotAnObject)?;
    let tag = object
        .get(TYPE_KEY)
        .and_then(Value::as_str)
        .ok_or(DependencyError::MissingType)?;

    let ctor = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(tag)
        .copied()
        .ok_or_else(|| DependencyError::UnknownType(tag.to_owned()))?;

    let mut params = object.clone();
    params.remove(TYPE_KEY);
    ctor(&params)
}

/// Serialize a dependency into its `{"type": …}` wire form.
pub fn to_value(dependency: &dyn ContextDependency) -> Value {
    let mut object = dependency.params();
    object.insert(
        TYPE_KEY.to_owned(),
        Value::String(dependency.type_tag().to_owned()),
    );
    Value::Object(object)
}

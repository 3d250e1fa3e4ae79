//! The module version dependency: a named module must be present in the
//! process-wide module table with a version matching a [`VersionReq`].
//!
//! Rust offers no runtime probe for the versions of linked crates or host
//! libraries, so the table is populated explicitly by the embedding
//! application through [`register_module_version`]. A module that was never
//! registered can not satisfy any requirement.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use semver::{Version, VersionReq};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ContextDependency, DependencyError};

static INSTALLED: LazyLock<RwLock<HashMap<String, Version>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Record the version of a module available in this process.
///
/// Re-registering a module replaces the previous version.
pub fn register_module_version(module_name: impl Into<String>, version: Version) {
    let module_name = module_name.into();
    tracing::debug!(module = %module_name, version = %version, "registered module version");
    INSTALLED
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(module_name, version);
}

/// Look up the registered version of a module, if any.
pub fn installed_module_version(module_name: &str) -> Option<Version> {
    INSTALLED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(module_name)
        .cloned()
}

/// Requires a module to be installed with a version inside an accepted range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleVersion {
    module_name: String,
    version_specs: VersionReq,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    module_name: String,
    version_specs: VersionReq,
}

impl ModuleVersion {
    /// The registry tag for this dependency type.
    pub const TYPE: &'static str = "module-version";

    /// Build a dependency on `module_name` being within `version_specs`.
    ///
    /// # Errors
    ///
    /// Fails when `module_name` is empty; there is nothing to check against.
    pub fn new(
        module_name: impl Into<String>,
        version_specs: VersionReq,
    ) -> Result<Self, DependencyError> {
        let module_name = module_name.into();
        if module_name.is_empty() {
            return Err(DependencyError::EmptyModuleName);
        }
        Ok(Self {
            module_name,
            version_specs,
        })
    }

    /// Registry constructor, reconstructing an instance from serialized
    /// parameters.
    ///
    /// # Errors
    ///
    /// Fails on unknown parameter keys, a missing field, or a `version_specs`
    /// string that does not parse as a version requirement.
    pub fn from_params(
        params: &Map<String, Value>,
    ) -> Result<Arc<dyn ContextDependency>, DependencyError> {
        let params: Params = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|source| DependencyError::BadParams {
                tag: Self::TYPE,
                source,
            })?;
        Ok(Arc::new(Self::new(params.module_name, params.version_specs)?))
    }

    /// The module this dependency checks.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The accepted version range.
    pub fn version_specs(&self) -> &VersionReq {
        &self.version_specs
    }
}

impl ContextDependency for ModuleVersion {
    fn type_tag(&self) -> &'static str {
        Self::TYPE
    }

    fn id(&self) -> String {
        format!("{}:{}-{}", Self::TYPE, self.module_name, self.version_specs)
    }

    fn is_satisfied(&self) -> bool {
        match installed_module_version(&self.module_name) {
            Some(version) => self.version_specs.matches(&version),
            None => {
                tracing::trace!(module = %self.module_name, "module absent from the version table");
                false
            }
        }
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "module_name".to_owned(),
            Value::String(self.module_name.clone()),
        );
        params.insert(
            "version_specs".to_owned(),
            Value::String(self.version_specs.to_string()),
        );
        params
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "module {} must be of version: {}",
            self.module_name, self.version_specs
        )
    }
}

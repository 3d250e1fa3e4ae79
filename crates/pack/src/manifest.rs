//! # Pack Manifest
//!
//! The manifest is the structured index of a pack: an ordered table of
//! [`ManifestSlot`]s, the context dependencies they reference, and creation
//! and update timestamps. It is serialized as the `manifest.json` entry of
//! the container, protocol version 2:
//!
//! ```json
//! {
//!   "version": 2,
//!   "meta": { "created_at": 1700000000.0, "updated_at": 1700000000.0 },
//!   "dependencies": { "<dep id>": { "type": "<tag>", ... }, ... },
//!   "slots": { "<slot key>": { "serialized_sha256_hash": "<hex>",
//!                              "serializer": "<codec tag>",
//!                              "dependencies": ["<dep id>", ...] }, ... }
//! }
//! ```
//!
//! Two invariants hold after every mutation: every dependency id referenced
//! by a slot is present in the dependency table, and no dependency survives
//! in the table once the last slot referencing it is gone.

#[cfg(test)]
mod test;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::deps::{self, ContextDependency, DependencyError};

/// The manifest protocol version this crate reads and writes.
pub const PROTOCOL_VERSION: u64 = 2;

/// Name of the manifest entry inside the container.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Errors raised while mutating or (de)serializing a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The document does not declare the supported protocol version.
    #[error("manifest declares an incompatible protocol version (expected {PROTOCOL_VERSION})")]
    IncompatibleVersion,
    /// The document does not match the manifest schema.
    #[error("malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A dependency could not be reconstructed.
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    /// A reconstructed dependency produced a different id than the one the
    /// manifest filed it under.
    #[error("dependency `{listed}` reconstructs with mismatching id `{actual}`")]
    DependencyIdMismatch {
        /// The id the manifest used.
        listed: String,
        /// The id the reconstructed dependency reports.
        actual: String,
    },
    /// A slot references a dependency id absent from the dependency table.
    #[error("slot `{slot}` references unknown dependency `{dependency}`")]
    UnknownSlotDependency {
        /// The slot holding the dangling reference.
        slot: String,
        /// The unresolvable dependency id.
        dependency: String,
    },
    /// A slot insert collided with an existing key.
    #[error("a slot already exists under the key `{0}`")]
    SlotExists(String),
    /// A lookup or removal named a key with no slot behind it.
    #[error("no slot exists under the key `{0}`")]
    NoSuchSlot(String),
}

/// Description of one stored artifact: its key, the codec that encoded it,
/// the payload checksum, and the context dependencies its reconstruction
/// requires.
#[derive(Debug, Clone)]
pub struct ManifestSlot {
    slot_key: String,
    codec_tag: String,
    sha256: String,
    dependencies: BTreeMap<String, Arc<dyn ContextDependency>>,
}

impl ManifestSlot {
    /// Describe a stored artifact.
    pub fn new(
        slot_key: impl Into<String>,
        codec_tag: impl Into<String>,
        sha256: impl Into<String>,
        dependencies: Vec<Arc<dyn ContextDependency>>,
    ) -> Self {
        Self {
            slot_key: slot_key.into(),
            codec_tag: codec_tag.into(),
            sha256: sha256.into(),
            dependencies: dependencies
                .into_iter()
                .map(|dep| (dep.id(), dep))
                .collect(),
        }
    }

    /// The unique key of this slot within its manifest.
    pub fn slot_key(&self) -> &str {
        &self.slot_key
    }

    /// Tag of the codec that encoded the payload.
    pub fn codec_tag(&self) -> &str {
        &self.codec_tag
    }

    /// Lowercase hex SHA-256 of the encoded payload.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Name of the payload entry inside the container.
    pub fn payload_name(&self) -> String {
        format!("{}.slot", self.sha256)
    }

    /// The context dependencies of this slot, keyed by id.
    pub fn dependencies(&self) -> &BTreeMap<String, Arc<dyn ContextDependency>> {
        &self.dependencies
    }

    /// Ids of the context dependencies this slot references.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    /// Ids of the dependencies not satisfied in the current execution
    /// context.
    pub fn unsatisfied_dependencies(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|(_, dep)| !dep.is_satisfied())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestDoc {
    version: u64,
    #[serde(default)]
    meta: MetaDoc,
    #[serde(default)]
    dependencies: BTreeMap<String, Value>,
    #[serde(default)]
    slots: BTreeMap<String, SlotDoc>,
}

// Unknown meta keys (e.g. the `python` note written by other producers) are
// tolerated and dropped.
#[derive(Serialize, Deserialize, Default)]
struct MetaDoc {
    #[serde(default)]
    created_at: Option<f64>,
    #[serde(default)]
    updated_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SlotDoc {
    serialized_sha256_hash: String,
    serializer: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// The structured index of a pack.
#[derive(Debug, Clone)]
pub struct Manifest {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    runtime: Option<String>,
    dependencies: BTreeMap<String, Arc<dyn ContextDependency>>,
    slots: BTreeMap<String, ManifestSlot>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// An empty manifest stamped with the current time.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            runtime: Some(concat!("pack/", env!("CARGO_PKG_VERSION")).to_owned()),
            dependencies: BTreeMap::new(),
            slots: BTreeMap::new(),
        }
    }

    /// When this pack was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When this pack was last mutated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Informational producer string, if one was recorded.
    pub fn runtime(&self) -> Option<&str> {
        self.runtime.as_deref()
    }

    /// The slot table, keyed by slot key.
    pub fn slots(&self) -> &BTreeMap<String, ManifestSlot> {
        &self.slots
    }

    /// The dependency table, keyed by dependency id.
    pub fn dependencies(&self) -> &BTreeMap<String, Arc<dyn ContextDependency>> {
        &self.dependencies
    }

    /// Look up one slot.
    pub fn slot(&self, slot_key: &str) -> Option<&ManifestSlot> {
        self.slots.get(slot_key)
    }

    /// Whether a slot exists under `slot_key`.
    pub fn has_slot(&self, slot_key: &str) -> bool {
        self.slots.contains_key(slot_key)
    }

    /// Insert a new slot, merging its dependencies into the dependency
    /// table. A dependency id already present wins: equal ids are
    /// semantically interchangeable.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::SlotExists`] on a key collision; the
    /// manifest is left untouched.
    pub fn insert_slot(&mut self, slot: ManifestSlot) -> Result<(), ManifestError> {
        if self.slots.contains_key(slot.slot_key()) {
            return Err(ManifestError::SlotExists(slot.slot_key().to_owned()));
        }

        for (id, dep) in slot.dependencies() {
            self.dependencies
                .entry(id.clone())
                .or_insert_with(|| Arc::clone(dep));
        }

        self.slots.insert(slot.slot_key().to_owned(), slot);
        Ok(())
    }

    /// Remove a slot and prune dependencies no longer referenced by any
    /// remaining slot.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NoSuchSlot`] when the key is unknown.
    pub fn remove_slot(&mut self, slot_key: &str) -> Result<ManifestSlot, ManifestError> {
        let slot = self
            .slots
            .remove(slot_key)
            .ok_or_else(|| ManifestError::NoSuchSlot(slot_key.to_owned()))?;
        self.prune_dependencies();
        Ok(slot)
    }

    /// Stamp `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn prune_dependencies(&mut self) {
        let referenced: BTreeSet<String> = self
            .slots
            .values()
            .flat_map(|slot| slot.dependencies.keys().cloned())
            .collect();
        self.dependencies.retain(|id, _| referenced.contains(id));
    }

    /// Serialize into the version-2 JSON document.
    ///
    /// # Errors
    ///
    /// Serialization of the document layer itself; does not fail for
    /// well-formed manifests.
    pub fn to_value(&self) -> Result<Value, ManifestError> {
        let doc = ManifestDoc {
            version: PROTOCOL_VERSION,
            meta: MetaDoc {
                created_at: Some(epoch_seconds(self.created_at)),
                updated_at: Some(epoch_seconds(self.updated_at)),
                runtime: self.runtime.clone(),
            },
            dependencies: self
                .dependencies
                .iter()
                .map(|(id, dep)| (id.clone(), deps::to_value(dep.as_ref())))
                .collect(),
            slots: self
                .slots
                .iter()
                .map(|(key, slot)| {
                    (key.clone(), SlotDoc {
                        serialized_sha256_hash: slot.sha256().to_owned(),
                        serializer: slot.codec_tag().to_owned(),
                        dependencies: slot.dependency_ids().map(str::to_owned).collect(),
                    })
                })
                .collect(),
        };
        Ok(serde_json::to_value(doc)?)
    }

    /// Reconstruct a manifest from its JSON document.
    ///
    /// Enforces the version, reconstructs every dependency through the type
    /// registry (checking that each reproduces the id it is filed under),
    /// and resolves every slot's dependency references. Missing timestamps
    /// default to the current time.
    ///
    /// # Errors
    ///
    /// Any schema violation surfaces as a [`ManifestError`]; the archive is
    /// unusable with this protocol.
    pub fn from_value(value: &Value) -> Result<Self, ManifestError> {
        if value.get("version").and_then(Value::as_u64) != Some(PROTOCOL_VERSION) {
            return Err(ManifestError::IncompatibleVersion);
        }

        let doc: ManifestDoc = serde_json::from_value(value.clone())?;

        let mut dependencies = BTreeMap::new();
        for (listed, dep_value) in &doc.dependencies {
            let dep = deps::from_value(dep_value)?;
            let actual = dep.id();
            if actual != *listed {
                return Err(ManifestError::DependencyIdMismatch {
                    listed: listed.clone(),
                    actual,
                });
            }
            dependencies.insert(listed.clone(), dep);
        }

        let mut slots = BTreeMap::new();
        for (slot_key, slot_doc) in doc.slots {
            let mut slot_deps = Vec::with_capacity(slot_doc.dependencies.len());
            for dep_id in &slot_doc.dependencies {
                let dep = dependencies.get(dep_id).ok_or_else(|| {
                    ManifestError::UnknownSlotDependency {
                        slot: slot_key.clone(),
                        dependency: dep_id.clone(),
                    }
                })?;
                slot_deps.push(Arc::clone(dep));
            }
            slots.insert(
                slot_key.clone(),
                ManifestSlot::new(
                    slot_key,
                    slot_doc.serializer,
                    slot_doc.serialized_sha256_hash,
                    slot_deps,
                ),
            );
        }

        let now = Utc::now();
        Ok(Self {
            created_at: doc
                .meta
                .created_at
                .and_then(datetime_from_epoch)
                .unwrap_or(now),
            updated_at: doc
                .meta
                .updated_at
                .and_then(datetime_from_epoch)
                .unwrap_or(now),
            runtime: doc.meta.runtime,
            dependencies,
            slots,
        })
    }
}

/// Wire timestamps are UTC epoch seconds as JSON numbers; microsecond
/// precision is all the container needs.
fn epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp_micros() as f64 / 1e6
}

fn datetime_from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros((seconds * 1e6).round() as i64)
}

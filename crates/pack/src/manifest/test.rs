//! Tests for manifest mutation and the JSON document layer.

use semver::VersionReq;
use serde_json::json;

use super::*;
use crate::deps::module_version::ModuleVersion;

fn dep(module: &str, specs: &str) -> anyhow::Result<Arc<dyn ContextDependency>> {
    Ok(Arc::new(ModuleVersion::new(
        module,
        VersionReq::parse(specs)?,
    )?))
}

fn assert_invariants(manifest: &Manifest) {
    let referenced: BTreeSet<&str> = manifest
        .slots()
        .values()
        .flat_map(ManifestSlot::dependency_ids)
        .collect();

    // No dependency survives unreferenced, and none is missing.
    for id in manifest.dependencies().keys() {
        assert!(referenced.contains(id.as_str()), "dangling dependency {id}");
    }
    for slot in manifest.slots().values() {
        for id in slot.dependency_ids() {
            assert!(
                manifest.dependencies().contains_key(id),
                "unresolved dependency {id}"
            );
        }
    }

    assert!(manifest.updated_at() >= manifest.created_at());
}

#[test]
fn fresh_manifest_is_empty() -> anyhow::Result<()> {
    let manifest = Manifest::new();
    assert!(manifest.slots().is_empty());
    assert!(manifest.dependencies().is_empty());
    assert_invariants(&manifest);

    let value = manifest.to_value()?;
    assert_eq!(value["version"], json!(PROTOCOL_VERSION));
    assert!(value["meta"]["created_at"].is_f64());
    assert_eq!(value["dependencies"], json!({}));
    assert_eq!(value["slots"], json!({}));
    Ok(())
}

#[test]
fn slot_derives_its_payload_name() {
    let slot = ManifestSlot::new("key", "bytes", "ahash", Vec::new());
    assert_eq!(slot.payload_name(), "ahash.slot");
}

#[test]
fn insert_merges_dependencies_and_rejects_collisions() -> anyhow::Result<()> {
    let shared = dep("shared", ">=1, <2")?;
    let mut manifest = Manifest::new();

    manifest.insert_slot(ManifestSlot::new(
        "one",
        "bytes",
        "hash1",
        vec![Arc::clone(&shared), dep("only-one", "=1.0.0")?],
    ))?;
    manifest.insert_slot(ManifestSlot::new(
        "two",
        "bytes",
        "hash2",
        vec![Arc::clone(&shared)],
    ))?;
    assert_invariants(&manifest);
    assert_eq!(manifest.dependencies().len(), 2);

    let collision = manifest.insert_slot(ManifestSlot::new("one", "text", "hash3", Vec::new()));
    assert!(matches!(collision, Err(ManifestError::SlotExists(key)) if key == "one"));
    assert_eq!(manifest.slots().len(), 2);
    Ok(())
}

#[test]
fn remove_prunes_unreferenced_dependencies() -> anyhow::Result<()> {
    let shared = dep("shared", ">=1, <2")?;
    let mut manifest = Manifest::new();
    manifest.insert_slot(ManifestSlot::new(
        "one",
        "bytes",
        "hash1",
        vec![Arc::clone(&shared), dep("only-one", "=1.0.0")?],
    ))?;
    manifest.insert_slot(ManifestSlot::new(
        "two",
        "bytes",
        "hash2",
        vec![Arc::clone(&shared)],
    ))?;

    manifest.remove_slot("one")?;
    assert_invariants(&manifest);
    // The shared dependency stays, the exclusive one is gone.
    assert_eq!(manifest.dependencies().len(), 1);
    assert!(manifest.dependencies().contains_key(&shared.id()));

    manifest.remove_slot("two")?;
    assert_invariants(&manifest);
    assert!(manifest.dependencies().is_empty());

    assert!(matches!(
        manifest.remove_slot("two"),
        Err(ManifestError::NoSuchSlot(key)) if key == "two"
    ));
    Ok(())
}

#[test]
fn touch_moves_updated_at_forward() {
    let mut manifest = Manifest::new();
    let before = manifest.updated_at();
    manifest.touch();
    assert!(manifest.updated_at() >= before);
    assert_invariants(&manifest);
}

#[test]
fn document_round_trip() -> anyhow::Result<()> {
    let mut manifest = Manifest::new();
    manifest.insert_slot(ManifestSlot::new(
        "weights",
        "json",
        "hash1",
        vec![dep("gizmo", ">=1.1.0, <=2.2.0")?],
    ))?;
    manifest.insert_slot(ManifestSlot::new("raw", "bytes", "hash2", Vec::new()))?;

    let value = manifest.to_value()?;
    let slot_doc = &value["slots"]["weights"];
    assert_eq!(slot_doc["serialized_sha256_hash"], json!("hash1"));
    assert_eq!(slot_doc["serializer"], json!("json"));
    assert_eq!(
        slot_doc["dependencies"],
        json!(["module-version:gizmo->=1.1.0, <=2.2.0"])
    );

    let rebuilt = Manifest::from_value(&value)?;
    assert_invariants(&rebuilt);
    assert_eq!(rebuilt.slots().len(), 2);
    assert_eq!(rebuilt.dependencies().len(), 1);
    assert_eq!(rebuilt.slot("raw").map(ManifestSlot::codec_tag), Some("bytes"));
    assert_eq!(rebuilt.runtime(), manifest.runtime());

    // Float epoch seconds survive with at worst sub-millisecond error.
    let drift = rebuilt.created_at() - manifest.created_at();
    assert!(drift.num_milliseconds().abs() <= 1);
    assert_eq!(rebuilt.to_value()?, value);
    Ok(())
}

#[test]
fn missing_timestamps_default_to_now() -> anyhow::Result<()> {
    let manifest = Manifest::from_value(&json!({"version": 2}))?;
    assert_invariants(&manifest);
    assert!(manifest.slots().is_empty());
    Ok(())
}

#[test]
fn foreign_meta_keys_are_tolerated() -> anyhow::Result<()> {
    let value = json!({
        "version": 2,
        "meta": {"created_at": 1700000000.25, "python": "3.11.4 (main)"},
    });
    let manifest = Manifest::from_value(&value)?;
    assert_eq!(manifest.created_at().timestamp(), 1_700_000_000);
    assert_eq!(manifest.runtime(), None);
    Ok(())
}

#[test]
fn rejects_foreign_protocol_versions() {
    for value in [json!({"version": 1}), json!({"version": 3}), json!({})] {
        assert!(matches!(
            Manifest::from_value(&value),
            Err(ManifestError::IncompatibleVersion)
        ));
    }
}

#[test]
fn rejects_non_object_tables() {
    for value in [
        json!({"version": 2, "dependencies": ["module-version:x-*"]}),
        json!({"version": 2, "slots": 7}),
    ] {
        assert!(matches!(
            Manifest::from_value(&value),
            Err(ManifestError::Malformed(_))
        ));
    }
}

#[test]
fn rejects_unknown_dependency_types() {
    let value = json!({
        "version": 2,
        "dependencies": {"mystery:x": {"type": "mystery"}},
    });
    assert!(matches!(
        Manifest::from_value(&value),
        Err(ManifestError::Dependency(DependencyError::UnknownType(tag))) if tag == "mystery"
    ));
}

#[test]
fn rejects_mismatching_dependency_ids() {
    let value = json!({
        "version": 2,
        "dependencies": {
            "module-version:other-=1.0.0": {
                "type": "module-version",
                "module_name": "gizmo",
                "version_specs": "=1.0.0",
            },
        },
    });
    assert!(matches!(
        Manifest::from_value(&value),
        Err(ManifestError::DependencyIdMismatch { listed, actual })
            if listed == "module-version:other-=1.0.0"
                && actual == "module-version:gizmo-=1.0.0"
    ));
}

#[test]
fn rejects_unresolvable_slot_dependencies() {
    let value = json!({
        "version": 2,
        "slots": {
            "weights": {
                "serialized_sha256_hash": "ahash",
                "serializer": "json",
                "dependencies": ["module-version:gone-=1.0.0"],
            },
        },
    });
    assert!(matches!(
        Manifest::from_value(&value),
        Err(ManifestError::UnknownSlotDependency { slot, dependency })
            if slot == "weights" && dependency == "module-version:gone-=1.0.0"
    ));
}

#[test]
fn rejects_slots_missing_mandatory_fields() {
    for slot_doc in [
        json!({"serializer": "json"}),
        json!({"serialized_sha256_hash": "ahash"}),
    ] {
        let value = json!({"version": 2, "slots": {"weights": slot_doc}});
        assert!(matches!(
            Manifest::from_value(&value),
            Err(ManifestError::Malformed(_))
        ));
    }
}

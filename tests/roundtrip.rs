//! End-to-end tests over the default-slot façade, against both in-memory
//! cursors and real files.

use std::io::Cursor;

use modelpack::{
    DEFAULT_SLOT, ManifestError, PackError, dump, dump_slot, load, load_slot, remove_slot,
};
use serde_json::{Value, json};

#[test]
fn default_slot_round_trip_in_memory() -> anyhow::Result<()> {
    let document = json!({"weights": [1, 2, 3], "bias": 0.5});
    let mut stream = Cursor::new(Vec::new());

    dump(&document, &mut stream)?;

    let recovered = load(&mut stream)?;
    assert_eq!(recovered.downcast_ref::<Value>(), Some(&document));

    // The default helpers operate on the canonical `_default` key.
    let by_key = load_slot(&mut stream, DEFAULT_SLOT)?;
    assert_eq!(by_key.downcast_ref::<Value>(), Some(&document));
    Ok(())
}

#[test]
fn default_slot_round_trip_on_disk() -> anyhow::Result<()> {
    let payload = vec![0x5au8; 4096];
    let mut file = tempfile::tempfile()?;

    dump(&payload, &mut file)?;

    let recovered = load(&mut file)?;
    assert_eq!(recovered.downcast_ref::<Vec<u8>>(), Some(&payload));
    Ok(())
}

#[test]
fn named_slots_are_independent() -> anyhow::Result<()> {
    let one = json!({"epoch": 1});
    let two = json!({"epoch": 2});
    let mut file = tempfile::tempfile()?;

    dump_slot(&one, &mut file, "1k")?;
    dump_slot(&two, &mut file, "2k")?;

    let first = load_slot(&mut file, "1k")?;
    let second = load_slot(&mut file, "2k")?;
    assert_eq!(first.downcast_ref::<Value>(), Some(&one));
    assert_eq!(second.downcast_ref::<Value>(), Some(&two));
    Ok(())
}

#[test]
fn facade_dump_replaces_the_existing_slot() -> anyhow::Result<()> {
    let mut stream = Cursor::new(Vec::new());

    dump_slot(&String::from("first"), &mut stream, "same-slot")?;
    dump_slot(&String::from("second"), &mut stream, "same-slot")?;

    let recovered = load_slot(&mut stream, "same-slot")?;
    assert_eq!(
        recovered.downcast_ref::<String>().map(String::as_str),
        Some("second")
    );
    Ok(())
}

#[test]
fn removed_slots_stay_gone() -> anyhow::Result<()> {
    let mut stream = Cursor::new(Vec::new());

    dump_slot(&String::from("ephemeral"), &mut stream, "scratch")?;
    remove_slot(&mut stream, "scratch")?;

    assert!(matches!(
        load_slot(&mut stream, "scratch"),
        Err(PackError::Manifest(ManifestError::NoSuchSlot(key))) if key == "scratch"
    ));
    assert!(matches!(
        remove_slot(&mut stream, "scratch"),
        Err(PackError::Manifest(ManifestError::NoSuchSlot(_)))
    ));
    Ok(())
}

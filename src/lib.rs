//! Modelpack, a multi-slot, content-addressed archive for serialized models.
//!
//! The heavy lifting lives in the [`pack`] core crate, re-exported here.
//! This crate adds the thin default-slot façade: one-call helpers that open
//! a pack over a stream, operate on a single slot, and hand the stream back.
//!
//! ```rust
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), modelpack::PackError> {
//! let mut stream = Cursor::new(Vec::new());
//! modelpack::dump(&String::from("v2 weights"), &mut stream)?;
//!
//! let recovered: Box<dyn std::any::Any> = modelpack::load(&mut stream)?;
//! assert_eq!(recovered.downcast_ref::<String>().map(String::as_str), Some("v2 weights"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use std::any::Any;
use std::io::{Read, Seek, Write};

pub use pack::{
    Codec, CodecError, ContextDependency, DependencyError, Manifest, ManifestError, ManifestSlot,
    ModuleVersion, Pack, PackError, codecs, deps, hash, installed_module_version, manifest,
    register_codec, register_dependency_type, register_module_version,
};

/// The slot key the default-slot helpers operate on.
pub const DEFAULT_SLOT: &str = "_default";

/// Store `value` in the default slot of the pack on `stream`, replacing any
/// value already there.
///
/// # Errors
///
/// Any [`PackError`] raised while opening the pack or storing the value.
pub fn dump<S>(value: &dyn Any, stream: S) -> Result<(), PackError>
where
    S: Read + Write + Seek,
{
    dump_slot(value, stream, DEFAULT_SLOT)
}

/// Store `value` under `slot_key` in the pack on `stream`, replacing any
/// value already there.
///
/// # Errors
///
/// Any [`PackError`] raised while opening the pack or storing the value.
pub fn dump_slot<S>(value: &dyn Any, stream: S, slot_key: &str) -> Result<(), PackError>
where
    S: Read + Write + Seek,
{
    let mut pack = Pack::new(stream)?;
    if pack.has_slot(slot_key) {
        pack.remove(slot_key)?;
    }
    pack.dump(slot_key, value)?;
    pack.close();
    Ok(())
}

/// Load the value stored in the default slot of the pack on `stream`.
///
/// # Errors
///
/// Any [`PackError`] raised while opening the pack or loading the value.
pub fn load<S>(stream: S) -> Result<Box<dyn Any>, PackError>
where
    S: Read + Write + Seek,
{
    load_slot(stream, DEFAULT_SLOT)
}

/// Load the value stored under `slot_key` in the pack on `stream`.
///
/// # Errors
///
/// Any [`PackError`] raised while opening the pack or loading the value.
pub fn load_slot<S>(stream: S, slot_key: &str) -> Result<Box<dyn Any>, PackError>
where
    S: Read + Write + Seek,
{
    let mut pack = Pack::new(stream)?;
    pack.load(slot_key)
}

/// Remove the slot stored under `slot_key` in the pack on `stream`.
///
/// # Errors
///
/// Any [`PackError`] raised while opening the pack, or
/// [`ManifestError::NoSuchSlot`] when the slot does not exist.
pub fn remove_slot<S>(stream: S, slot_key: &str) -> Result<(), PackError>
where
    S: Read + Write + Seek,
{
    let mut pack = Pack::new(stream)?;
    pack.remove(slot_key)
}

//! # Pack Crate
//!
//! The `pack` crate implements a multi-slot, content-addressed model
//! archive: a single ZIP container holding independently named serialized
//! artifacts (*slots*) next to a structured manifest that records their
//! checksums, the codec each was encoded with, and the context dependencies
//! that must hold before an artifact may be reconstructed.
//!
//! ## Key Concepts
//!
//! **Slots** are named entries storing one encoded value each. Payloads are
//! content-addressed by their SHA-256, so identical values stored under
//! different keys share one payload entry, and every read verifies the
//! checksum before decoding.
//!
//! **Codecs** are tagged encode/decode pairs dispatched through a
//! process-wide, priority-ordered registry: reverse lookup picks the codec
//! for a value on write, forward lookup reconstructs it by tag on read.
//!
//! **Context dependencies** are tagged predicates over the runtime
//! environment, declared by codecs at encode time and re-evaluated before a
//! slot is decoded. The built-in variant pins a module to a semantic
//! version range.
//!
//! ## Architecture
//!
//! The crate is organized into several key modules:
//! - [`manifest`] - Manifest schema, slot table, and JSON document layer
//! - [`codecs`] - Codec trait, registry, and built-in leaves
//! - [`deps`] - Context dependency trait, registry, and module-version
//!   variant
//! - [`hash`] - Streaming SHA-256 helpers
//!
//! The [`Pack`] container itself ties these together over any
//! `Read + Write + Seek` stream.
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::io::Cursor;
//!
//! use pack::Pack;
//!
//! # fn main() -> Result<(), pack::PackError> {
//! let mut pack = Pack::new(Cursor::new(Vec::new()))?;
//! pack.dump("greeting", &String::from("hello"))?;
//!
//! let mut pack = Pack::new(pack.close())?;
//! let greeting: String = pack.load_as("greeting")?;
//! assert_eq!(greeting, "hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Container Format
//!
//! A pack is a plain ZIP file with exactly one logically live
//! `manifest.json` entry plus zero or more payload entries named
//! `<sha256>.slot`. The container is mutated append-only: rewriting the
//! manifest or deleting a payload appends a shadowing entry with the same
//! name, and per name only the last entry counts.

#![deny(missing_docs)]

pub mod codecs;
mod core;
pub mod deps;
pub mod hash;
pub mod manifest;

pub use codecs::{Codec, CodecError, register_codec};
pub use core::{DEFAULT_SPOOL_THRESHOLD, Pack, PackError};
pub use deps::module_version::{ModuleVersion, installed_module_version, register_module_version};
pub use deps::{ContextDependency, DependencyError, register_dependency_type};
pub use manifest::{Manifest, ManifestError, ManifestSlot};

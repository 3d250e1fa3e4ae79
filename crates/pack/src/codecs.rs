//! # Codec Registry
//!
//! A codec is a tagged pair of encode/decode procedures for a family of
//! values. The registry keeps codec constructors in priority order, most
//! specific first, and offers two lookups: forward by tag when a slot is
//! read back, and reverse by value when a slot is written.
//!
//! Values cross the codec boundary as [`Any`] trait objects: codecs claim
//! the concrete types they understand through
//! [`can_encode`](Codec::can_encode) and downcast internally. The registry
//! is seeded with the built-in leaves ([`BytesCodec`], [`TextCodec`],
//! [`JsonCodec`]) and extended through [`register_codec`], which inserts at
//! the high-priority end.


mod builtin;

pub use builtin::{BytesCodec, JsonCodec, TextCodec};

use std::any::Any;
use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use thiserror::Error;

use crate::deps::ContextDependency;

/// Errors raised by codec lookup, encoding, and decoding.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Forward lookup failed: nothing is registered under the tag.
    #[error("no codec registered under tag `{0}`")]
    UnknownTag(String),
    /// Reverse lookup failed: no registered codec accepts the value.
    #[error("no registered codec accepts this value")]
    Unsupported,
    /// The byte stream could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Decoded text was not valid UTF-8.
    #[error("decoded text is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// Catch-all for codecs implemented outside this crate.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// A tagged encode/decode pair for one family of values.
///
/// Codecs are value objects: the registry constructs a fresh instance per
/// operation, so an implementation may accumulate state during
/// [`encode`](Codec::encode) — most importantly the context dependencies its
/// decoder will require, reported through
/// [`context_dependencies`](Codec::context_dependencies) afterwards.
pub trait Codec: fmt::Debug {
    /// The non-empty constant tag identifying this codec in the registry and
    /// in slot metadata.
    fn tag(&self) -> &'static str;

    /// Whether this codec can encode `value`. Must be cheap and free of side
    /// effects; it runs for every candidate during reverse lookup.
    fn can_encode(&self, value: &dyn Any) -> bool;

    /// Encode `value` into `sink`.
    ///
    /// # Errors
    ///
    /// Fails when the value is not one this codec accepts or the sink
    /// rejects the bytes.
    fn encode(&mut self, value: &dyn Any, sink: &mut dyn Write) -> Result<(), CodecError>;

    /// Decode a value from `source`, the inverse of [`encode`](Codec::encode).
    ///
    /// # Errors
    ///
    /// Fails when the bytes do not form a valid encoding.
    fn decode(&mut self, source: &mut dyn Read) -> Result<Box<dyn Any>, CodecError>;

    /// The context dependencies the decoder will require, as declared during
    /// the preceding [`encode`](Codec::encode) call.
    fn context_dependencies(&self) -> Vec<Arc<dyn ContextDependency>> {
        Vec::new()
    }
}

/// Constructor signature stored in the registry.
pub type CodecCtor = fn() -> Box<dyn Codec>;

struct Entry {
    tag: &'static str,
    ctor: CodecCtor,
}

impl Entry {
    fn of(ctor: CodecCtor) -> Self {
        Self { tag: ctor().tag(), ctor }
    }
}

static REGISTRY: LazyLock<RwLock<Vec<Entry>>> = LazyLock::new(|| {
    let builtins: [CodecCtor; 3] = [
        || Box::new(BytesCodec),
        || Box::new(TextCodec),
        || Box::new(JsonCodec),
    ];
    RwLock::new(builtins.into_iter().map(Entry::of).collect())
});

/// Register a codec constructor at the high-priority end of the registry.
pub fn register_codec(ctor: CodecCtor) {
    let entry = Entry::of(ctor);
    tracing::debug!(tag = entry.tag, "registered codec");
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(0, entry);
}

/// Construct the codec registered under `tag`.
///
/// # Errors
///
/// Returns [`CodecError::UnknownTag`] when nothing is registered under the
/// tag.
pub fn by_tag(tag: &str) -> Result<Box<dyn Codec>, CodecError> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .find(|entry| entry.tag == tag)
        .map(|entry| (entry.ctor)())
        .ok_or_else(|| CodecError::UnknownTag(tag.to_owned()))
}

/// Construct the highest-priority codec claiming support for `value`.
///
/// # Errors
///
/// Returns [`CodecError::Unsupported`] when no registered codec accepts the
/// value.
pub fn find_for(value: &dyn Any) -> Result<Box<dyn Codec>, CodecError> {
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    for entry in registry.iter() {
        let codec = (entry.ctor)();
        if codec.can_encode(value) {
            return Ok(codec);
        }
    }
    Err(CodecError::Unsupported)
}
